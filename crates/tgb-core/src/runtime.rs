//! The control loop.
//!
//! One task owns every piece of mutable bridge state (checkpoint, daily stats)
//! and is the only place promises get settled. Network calls run on the
//! [`AsyncPool`]; their results come back as [`Completion`]s.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    config::Config,
    delivery::{Delivery, SendObserver},
    dispatcher::CommandDispatcher,
    domain::{SendTarget, UpdateBatch},
    poller::Poller,
    pool::{AsyncPool, Completion},
    ports::{BotApi, Host},
    report::{self, DailyReport, DailyReportTracker},
    state::{BridgeState, StateStore},
    Result,
};

type Clock = Box<dyn Fn() -> i32 + Send>;

pub struct Bridge {
    cfg: Arc<Config>,
    host: Arc<dyn Host>,
    delivery: Delivery,
    dispatcher: CommandDispatcher,
    poller: Poller,
    report: DailyReportTracker,
    store: StateStore,
    completions: mpsc::UnboundedReceiver<Completion>,
    inbox: mpsc::UnboundedReceiver<UpdateBatch>,
    ticks: u64,
    today: Clock,
}

impl Bridge {
    /// Restore persisted state and wire the components together.
    pub fn new(
        cfg: Arc<Config>,
        api: Arc<dyn BotApi>,
        host: Arc<dyn Host>,
        store: StateStore,
    ) -> Result<Self> {
        let state = store.load()?;
        let (pool, completions) = AsyncPool::new(cfg.bridge.workers);
        let delivery = Delivery::new(api.clone(), pool.clone());
        let bot = Arc::new(cfg.bot.clone());
        let dispatcher = CommandDispatcher::new(bot, host.clone(), delivery.clone());
        let (poller, inbox) = Poller::new(api, pool, state.last_message);

        info!(
            checkpoint = ?state.last_message,
            day = ?state.date,
            samples = state.stat.tps.len(),
            "restored bridge state"
        );

        Ok(Self {
            cfg,
            host,
            delivery,
            dispatcher,
            poller,
            report: DailyReportTracker::new(state.date, state.stat),
            store,
            completions,
            inbox,
            ticks: 0,
            today: Box::new(report::today),
        })
    }

    /// Register a pre-send observer for every outgoing message.
    pub fn with_observer(mut self, observer: Arc<dyn SendObserver>) -> Self {
        self.delivery = self.delivery.with_observer(observer);
        self.dispatcher = CommandDispatcher::new(
            Arc::new(self.cfg.bot.clone()),
            self.host.clone(),
            self.delivery.clone(),
        );
        self
    }

    /// Replace the calendar used for rollover detection.
    pub fn with_clock(mut self, today: impl Fn() -> i32 + Send + 'static) -> Self {
        self.today = Box::new(today);
        self
    }

    /// Run until `shutdown` fires, then persist state.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<()> {
        let mut ticker = interval(self.cfg.bridge.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            tick_ms = self.cfg.bridge.tick.as_millis() as u64,
            check_interval_ticks = self.cfg.bridge.check_interval_ticks,
            stat_interval_ticks = self.cfg.bridge.stat_interval_ticks,
            "bridge control loop started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => self.tick(),
                Some(completion) = self.completions.recv() => self.settle(completion),
                Some(batch) = self.inbox.recv() => self.handle_batch(batch).await,
            }
        }

        info!("bridge control loop stopping");
        self.persist()
    }

    fn tick(&mut self) {
        self.ticks += 1;
        if self.ticks % u64::from(self.cfg.bridge.check_interval_ticks) == 0 {
            self.poller.poll();
        }
        if self.ticks % u64::from(self.cfg.bridge.stat_interval_ticks) == 0 {
            self.update_stats();
        }
    }

    fn settle(&mut self, completion: Completion) {
        if let Err(e) = completion.settle() {
            error!(error = %e, "job completion settled an already settled promise");
        }
    }

    async fn handle_batch(&mut self, batch: UpdateBatch) {
        let before = self.poller.checkpoint();
        let fresh = self.poller.accept(batch);

        if !fresh.is_empty() {
            debug!(count = fresh.len(), "dispatching inbound messages");
        }
        for msg in &fresh {
            self.dispatcher.dispatch(msg).await;
        }

        if self.poller.checkpoint() == before {
            return;
        }
        if let Err(e) = self.persist() {
            warn!(error = %e, "failed to persist message checkpoint");
        }
    }

    /// Rollover check first, so the sample of a rollover tick counts for the new day.
    fn update_stats(&mut self) {
        if let Some(report) = self.report.check_rollover((self.today)()) {
            self.emit_report(&report);
            if let Err(e) = self.persist() {
                warn!(error = %e, "failed to persist stats after rollover");
            }
        }

        let online = self.host.online_users();
        self.report.record(self.host.ticks_per_second(), &online);
    }

    fn emit_report(&self, report: &DailyReport) {
        let text = report.render(&self.host.motd());
        match self.cfg.bot.report_chat_id {
            Some(chat_id) => {
                info!(day = report.day, "sending daily report");
                self.delivery.send(text, SendTarget::Chat(chat_id));
            }
            None => {
                info!(report = %text, "no chat-id configured; daily report not sent");
            }
        }
    }

    fn snapshot(&self) -> BridgeState {
        BridgeState {
            date: self.report.day(),
            last_message: self.poller.checkpoint(),
            stat: self.report.stat().clone(),
        }
    }

    fn persist(&self) -> Result<()> {
        self.store.save(&self.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BotConfig, BridgeConfig};
    use crate::domain::{ChatId, InboundMessage, MessageId, UpdateId};
    use crate::report::DailyStat;
    use crate::testing::{batch_of, FakeBotApi, FakeHost};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::time::Duration;

    fn config(report_chat: Option<i64>) -> Arc<Config> {
        Arc::new(Config {
            bot: BotConfig {
                token: "123:abc".to_string(),
                users: vec!["alice".to_string()],
                passwords: HashMap::from([("alice".to_string(), "p1".to_string())]),
                report_chat_id: report_chat.map(ChatId),
            },
            bridge: BridgeConfig {
                tick: Duration::from_millis(1),
                check_interval_ticks: 2,
                stat_interval_ticks: 1,
                workers: 2,
                ..Default::default()
            },
        })
    }

    fn message(id: i64, text: &str) -> InboundMessage {
        InboundMessage {
            update_id: UpdateId(id),
            message_id: MessageId(id as i32 + 1000),
            chat_id: ChatId(9),
            username: Some("alice".to_string()),
            text: text.to_string(),
        }
    }

    struct Fixture {
        api: Arc<FakeBotApi>,
        host: Arc<FakeHost>,
        store: StateStore,
        day: Arc<AtomicI32>,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        Fixture {
            api: Arc::new(FakeBotApi::default()),
            host: Arc::new(FakeHost::default()),
            store: StateStore::new(dir.path().join("state.json")),
            day: Arc::new(AtomicI32::new(100)),
            _dir: dir,
        }
    }

    fn bridge(f: &Fixture, cfg: Arc<Config>) -> Bridge {
        let day = f.day.clone();
        Bridge::new(cfg, f.api.clone(), f.host.clone(), f.store.clone())
            .unwrap()
            .with_clock(move || day.load(Ordering::SeqCst))
    }

    async fn drain_one(b: &mut Bridge) {
        let c = b.completions.recv().await.unwrap();
        b.settle(c);
    }

    #[tokio::test]
    async fn rollover_sends_report_to_chat_and_resets() {
        let f = fixture();
        f.host.set_tps(20.0);
        f.host.set_online(&[("steve", false), ("alex", true), ("sam", true)]);
        let mut b = bridge(&f, config(Some(-100)));

        // Day 100: marker stored, then three samples.
        for _ in 0..3 {
            b.update_stats();
        }
        assert_eq!(b.report.stat().tps.len(), 3);
        assert_eq!(b.report.stat().first_joined, vec!["steve"]);

        f.day.store(101, Ordering::SeqCst);
        b.update_stats();
        drain_one(&mut b).await;

        let sent = f.api.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].target, SendTarget::Chat(ChatId(-100)));
        assert!(sent[0].text.contains("Daily report for Test Server"));
        assert!(sent[0].text.contains("Average TPS: 20"));
        assert!(sent[0].text.contains("steve"));
        assert!(sent[0].text.contains("Maximum concurrent users: 3"));

        // Only the rollover tick's sample belongs to the new day.
        assert_eq!(b.report.stat().tps.len(), 1);
        assert_eq!(f.store.load().unwrap().date, Some(101));

        // Same day again: no second report.
        b.update_stats();
        tokio::task::yield_now().await;
        assert_eq!(f.api.sent().len(), 1);
    }

    #[tokio::test]
    async fn rollover_without_chat_discards_report() {
        let f = fixture();
        f.store
            .save(&BridgeState {
                date: Some(99),
                last_message: None,
                stat: DailyStat {
                    first_joined: vec!["steve".to_string()],
                    tps: vec![18.0],
                    maximum_concurrent_users: 1,
                },
            })
            .unwrap();

        let mut b = bridge(&f, config(None));
        b.update_stats();
        tokio::task::yield_now().await;

        assert!(f.api.sent().is_empty());
        let saved = f.store.load().unwrap();
        assert_eq!(saved.date, Some(100));
        assert!(saved.stat.first_joined.is_empty());
    }

    #[tokio::test]
    async fn batch_is_dispatched_in_order_and_checkpointed() {
        let f = fixture();
        f.host.reply("list", &["2 online"]);
        f.host.reply("tps", &["20.0"]);
        let mut b = bridge(&f, config(None));

        b.handle_batch(batch_of(vec![
            message(8, "p1 tps"),
            message(7, "p1 list"),
            message(9, "bad list"),
        ]))
        .await;

        let commands: Vec<String> = f.host.commands().into_iter().map(|(_, c)| c).collect();
        assert_eq!(commands, vec!["list", "tps"]);
        assert_eq!(f.store.load().unwrap().last_message, Some(9));

        // Replayed updates are ignored.
        b.handle_batch(batch_of(vec![message(8, "p1 tps")])).await;
        assert_eq!(f.host.commands().len(), 2);

        drain_one(&mut b).await;
        drain_one(&mut b).await;
        assert_eq!(f.api.sent().len(), 2);
    }

    #[tokio::test]
    async fn checkpoint_survives_restart() {
        let f = fixture();
        {
            let mut b = bridge(&f, config(None));
            b.handle_batch(batch_of(vec![message(41, "p1 list")])).await;
        }
        let b = bridge(&f, config(None));
        assert_eq!(b.poller.offset(), 42);
    }

    #[tokio::test]
    async fn non_text_updates_are_checkpointed_and_survive_restart() {
        let f = fixture();
        {
            let mut b = bridge(&f, config(None));
            b.handle_batch(UpdateBatch {
                last_update_id: Some(UpdateId(57)),
                messages: Vec::new(),
            })
            .await;
            assert!(f.host.commands().is_empty());
        }
        assert_eq!(f.store.load().unwrap().last_message, Some(57));

        let b = bridge(&f, config(None));
        assert_eq!(b.poller.offset(), 58);
    }

    #[tokio::test]
    async fn run_polls_dispatches_and_saves_on_shutdown() {
        let f = fixture();
        f.host.reply("list", &["1 online"]);
        f.api.push_batch(vec![message(5, "p1 list")]);

        let b = bridge(&f, config(None));
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(b.run(shutdown.clone()));

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while f.api.sent().is_empty() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        shutdown.cancel();
        handle.await.unwrap().unwrap();

        let sent = f.api.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].text, "1 online");
        assert_eq!(f.api.offsets()[0], 0);
        assert_eq!(f.store.load().unwrap().last_message, Some(5));
    }
}
