//! 消息同步引擎
//!
//! 职责：
//! - 为单个会话维护一份去重、按时间有序的可见消息集
//! - 调和两条独立且都不可靠的来源：实时通道（低延迟、尽力而为）
//!   与周期拉取（高延迟、保证完整）
//! - 提供出站发送（实时优先、HTTP 回退）、附件上传、已读回执
//!
//! 所有合并都在一个后台任务中串行执行（tokio::select! 驱动），
//! 可见集的读者通过锁获得一致快照，绝不会观察到合并中途的状态。
//! stop 之后到达的在途 I/O 结果按代号（generation）一律丢弃。

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::connection_state::LiveChannelState;
use crate::error::Result;
use crate::events::{event_timestamp, ChatEvent, EventManager};
use crate::http_client::ChatTransport;
use crate::live_channel::{LiveChannel, LiveEvent};
use crate::message::{ChatMessage, OutgoingMessage};
use crate::sync::merge::{self, MergeOutcome};

/// 引擎配置
#[derive(Debug, Clone)]
pub struct SyncEngineConfig {
    /// 会话标识，引擎生命周期内不变
    pub conversation_id: String,
    /// 当前参与者标识
    pub user_id: String,
    /// 当前参与者角色（patient / doctor）
    pub user_role: String,
    /// 周期拉取间隔
    pub pull_interval: Duration,
    /// 事件广播缓冲区大小
    pub event_buffer_size: usize,
}

impl SyncEngineConfig {
    /// 创建引擎配置（拉取间隔默认 3 秒）
    pub fn new(conversation_id: &str, user_id: &str, user_role: &str) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            user_id: user_id.to_string(),
            user_role: user_role.to_string(),
            pull_interval: Duration::from_secs(3),
            event_buffer_size: 256,
        }
    }

    /// 自定义拉取间隔
    pub fn with_pull_interval(mut self, interval: Duration) -> Self {
        self.pull_interval = interval;
        self
    }

    /// 自定义事件广播缓冲区大小
    pub fn with_event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = size;
        self
    }
}

/// 引擎共享状态（后台任务与调用方共同持有）
struct EngineShared {
    /// 可见消息集：id 唯一，按服务端时间升序
    visible: parking_lot::RwLock<Vec<ChatMessage>>,
    /// 引擎是否处于运行态
    running: AtomicBool,
    /// 代号：start 与 stop 各推进一次，在途结果凭代号决定去留
    generation: AtomicU64,
    /// 后台循环任务
    run_task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

/// 消息同步引擎
///
/// 每个会话一个实例，独占一条实时通道与一个轮询定时器；
/// 实例之间互不影响
pub struct MessageSyncEngine {
    config: SyncEngineConfig,
    transport: Arc<dyn ChatTransport>,
    live: Arc<dyn LiveChannel>,
    events: Arc<EventManager>,
    shared: Arc<EngineShared>,
}

impl MessageSyncEngine {
    /// 创建引擎（不发起任何 I/O，直到 start）
    pub fn new(
        config: SyncEngineConfig,
        transport: Arc<dyn ChatTransport>,
        live: Arc<dyn LiveChannel>,
    ) -> Self {
        let events = Arc::new(EventManager::new(config.event_buffer_size));

        Self {
            config,
            transport,
            live,
            events,
            shared: Arc::new(EngineShared {
                visible: parking_lot::RwLock::new(Vec::new()),
                running: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                run_task: tokio::sync::Mutex::new(None),
            }),
        }
    }

    /// 会话标识
    pub fn conversation_id(&self) -> &str {
        &self.config.conversation_id
    }

    /// 可见消息集快照（id 唯一、按时间升序、已滤除删除消息）
    pub fn visible_messages(&self) -> Vec<ChatMessage> {
        self.shared.visible.read().clone()
    }

    /// 当前可见消息数
    pub fn message_count(&self) -> usize {
        self.shared.visible.read().len()
    }

    /// 实时通道当前状态
    pub fn live_channel_state(&self) -> LiveChannelState {
        self.live.state()
    }

    /// 订阅引擎事件（可见集变更、新消息、通道状态）
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }

    /// 事件管理器（统计查询等）
    pub fn events(&self) -> Arc<EventManager> {
        self.events.clone()
    }

    /// 启动引擎
    ///
    /// 返回时可见集已反映拉取时刻的历史（即便实时通道尚未连上）。
    /// 初始拉取失败不是致命错误：从空集起步，靠后续轮询或实时帧补齐。
    /// 实时通道打开失败时引擎以仅轮询模式运行。
    pub async fn start(&self) -> Result<()> {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            warn!(
                "引擎已在运行，忽略重复 start: conversation_id={}",
                self.config.conversation_id
            );
            return Ok(());
        }
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        info!(
            "🚀 启动消息同步引擎: conversation_id={}",
            self.config.conversation_id
        );

        // 1. 初始全量拉取
        match self
            .transport
            .fetch_history(&self.config.conversation_id)
            .await
        {
            Ok(batch) => {
                Self::apply_pull(
                    &self.shared,
                    &self.events,
                    &self.config.conversation_id,
                    generation,
                    batch,
                )
                .await;
            }
            Err(e) => warn!("⚠️ 初始历史拉取失败，从空集起步: {}", e),
        }

        // 2. 打开实时通道（失败则降级为仅轮询）
        let frames = match self.live.open().await {
            Ok(rx) => {
                self.emit_state_change(LiveChannelState::Connecting, LiveChannelState::Open)
                    .await;
                Some(rx)
            }
            Err(e) => {
                warn!("实时通道打开失败，降级为仅轮询模式: {}", e);
                self.emit_state_change(LiveChannelState::Connecting, LiveChannelState::Errored)
                    .await;
                None
            }
        };

        // 3. 后台循环：轮询 + 实时帧，单任务串行合并
        let handle = tokio::spawn(Self::run_loop(
            self.shared.clone(),
            self.transport.clone(),
            self.events.clone(),
            self.config.conversation_id.clone(),
            self.config.pull_interval,
            generation,
            frames,
        ));
        *self.shared.run_task.lock().await = Some(handle);

        Ok(())
    }

    /// 停止引擎（幂等）
    ///
    /// 取消轮询定时器并关闭实时通道；返回后不会再有任何合并发生，
    /// stop 之前发起、之后才完成的 I/O 结果按代号丢弃
    pub async fn stop(&self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }
        // 先推进代号，让在途结果全部失效
        self.shared.generation.fetch_add(1, Ordering::SeqCst);

        if let Some(handle) = self.shared.run_task.lock().await.take() {
            handle.abort();
        }
        self.live.close().await;

        info!(
            "🛑 消息同步引擎已停止: conversation_id={}",
            self.config.conversation_id
        );
    }

    /// 发送文本消息
    ///
    /// 通道选择：实时通道 Open 时优先写实时帧，否则（或写入未确认时）
    /// 回退为一次同步 HTTP 投递。每次调用恰好一轮投递，不在内部重试；
    /// 失败如实上抛，由调用方决定是否重新 send。
    /// 成功后消息经正常的实时/拉取合并路径进入可见集，不做乐观插入。
    pub async fn send(&self, body: &str) -> Result<()> {
        let payload = OutgoingMessage::text(&self.config.user_id, &self.config.user_role, body);
        self.deliver(payload).await
    }

    /// 上传附件并发送
    ///
    /// 两阶段：先阻塞上传换取持久文件引用，再走与 send 相同的通道选择。
    /// 上传阶段失败直接中止，不会产生指向不存在文件的消息。
    pub async fn upload_attachment(
        &self,
        filename: &str,
        mime_type: &str,
        bytes: Vec<u8>,
    ) -> Result<()> {
        let uploaded = self
            .transport
            .upload_file(&self.config.conversation_id, filename, mime_type, bytes)
            .await?;

        let payload = OutgoingMessage::attachment(
            &self.config.user_id,
            &self.config.user_role,
            filename,
            mime_type,
            uploaded.file_url,
        );
        self.deliver(payload).await
    }

    /// 经 WhatsApp 中继发送文本
    ///
    /// 中继产生的消息由服务端写入会话，经正常拉取路径回流
    pub async fn send_whatsapp(&self, body: &str) -> Result<()> {
        self.transport
            .send_whatsapp(&self.config.conversation_id, body)
            .await
    }

    /// 标记消息已读（尽力而为）
    ///
    /// 失败不上抛、不影响可见集；服务端接口幂等，下一次拉取会带回
    /// 增长后的 read_by
    pub async fn mark_read(&self, message_id: &str) {
        if let Err(e) = self.transport.mark_read(message_id).await {
            debug!(
                "已读回执投递失败（忽略）: message_id={}, {}",
                message_id, e
            );
        }
    }

    /// 通道选择与单轮投递
    async fn deliver(&self, payload: OutgoingMessage) -> Result<()> {
        if self.live.state().is_open() {
            match self.live.send_frame(&payload).await {
                Ok(()) => {
                    debug!(
                        "📡 实时投递成功: conversation_id={}",
                        self.config.conversation_id
                    );
                    return Ok(());
                }
                Err(e) => warn!("实时帧写入失败，回退 HTTP 投递: {}", e),
            }
        }

        self.transport
            .send_message(&self.config.conversation_id, &payload)
            .await
    }

    /// 后台循环：周期拉取与实时帧在同一任务中串行合并
    async fn run_loop(
        shared: Arc<EngineShared>,
        transport: Arc<dyn ChatTransport>,
        events: Arc<EventManager>,
        conversation_id: String,
        pull_interval: Duration,
        generation: u64,
        frames: Option<mpsc::Receiver<LiveEvent>>,
    ) {
        let mut ticker = tokio::time::interval(pull_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // interval 的第一个 tick 立即完成，初始拉取在 start 中已做过
        ticker.tick().await;

        let (mut frames, mut live_open) = match frames {
            Some(rx) => (rx, true),
            None => {
                let (_tx, rx) = mpsc::channel(1);
                (rx, false)
            }
        };
        let mut last_state = LiveChannelState::Open;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match transport.fetch_history(&conversation_id).await {
                        Ok(batch) => {
                            Self::apply_pull(&shared, &events, &conversation_id, generation, batch)
                                .await;
                        }
                        // 瞬时故障：跳过本轮，下个周期重试，无退避
                        Err(e) => debug!("周期拉取失败，跳过本轮: {}", e),
                    }
                }
                event = frames.recv(), if live_open => {
                    match event {
                        Some(LiveEvent::Frame(raw)) => {
                            Self::apply_live_frame(
                                &shared, &events, &conversation_id, generation, &raw,
                            )
                            .await;
                        }
                        Some(LiveEvent::StateChanged(new_state)) => {
                            events
                                .emit(ChatEvent::LiveChannelStateChanged {
                                    conversation_id: conversation_id.clone(),
                                    old_state: last_state,
                                    new_state,
                                    timestamp: event_timestamp(),
                                })
                                .await;
                            last_state = new_state;
                            if new_state.is_terminal() {
                                info!("实时通道终止（{}），降级为仅轮询模式", new_state);
                                live_open = false;
                            }
                        }
                        None => {
                            live_open = false;
                        }
                    }
                }
            }
        }
    }

    /// 在途结果是否仍可合并（stop 之后代号已推进，一律丢弃）
    fn merge_allowed(shared: &EngineShared, generation: u64) -> bool {
        shared.running.load(Ordering::SeqCst)
            && shared.generation.load(Ordering::SeqCst) == generation
    }

    /// 应用一次全量拉取结果
    async fn apply_pull(
        shared: &EngineShared,
        events: &EventManager,
        conversation_id: &str,
        generation: u64,
        batch: Vec<ChatMessage>,
    ) {
        if !Self::merge_allowed(shared, generation) {
            debug!("丢弃拖尾拉取结果: conversation_id={}", conversation_id);
            return;
        }

        let (outcome, count) = {
            let mut visible = shared.visible.write();
            let outcome = merge::merge_pull(&mut visible, batch);
            (outcome, visible.len())
        };
        Self::emit_merge_events(events, conversation_id, outcome, count).await;
    }

    /// 应用一条实时帧；解析失败只丢弃该帧并记日志
    async fn apply_live_frame(
        shared: &EngineShared,
        events: &EventManager,
        conversation_id: &str,
        generation: u64,
        raw: &str,
    ) {
        if !Self::merge_allowed(shared, generation) {
            debug!("丢弃拖尾实时帧: conversation_id={}", conversation_id);
            return;
        }

        let message: ChatMessage = match serde_json::from_str(raw) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("忽略无法解析的实时帧: {}", e);
                return;
            }
        };

        let (outcome, count) = {
            let mut visible = shared.visible.write();
            let outcome = merge::merge_live_frame(&mut visible, message);
            (outcome, visible.len())
        };
        Self::emit_merge_events(events, conversation_id, outcome, count).await;
    }

    async fn emit_merge_events(
        events: &EventManager,
        conversation_id: &str,
        outcome: MergeOutcome,
        count: usize,
    ) {
        for message_id in &outcome.added {
            events
                .emit(ChatEvent::MessageReceived {
                    conversation_id: conversation_id.to_string(),
                    message_id: message_id.clone(),
                    timestamp: event_timestamp(),
                })
                .await;
        }
        if outcome.changed {
            events
                .emit(ChatEvent::VisibleMessagesChanged {
                    conversation_id: conversation_id.to_string(),
                    count,
                    timestamp: event_timestamp(),
                })
                .await;
        }
    }

    async fn emit_state_change(&self, old_state: LiveChannelState, new_state: LiveChannelState) {
        self.events
            .emit(ChatEvent::LiveChannelStateChanged {
                conversation_id: self.config.conversation_id.clone(),
                old_state,
                new_state,
                timestamp: event_timestamp(),
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClinichatSDKError;
    use crate::http_client::FileUploadResponse;
    use crate::message::message_kinds;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;

    fn msg(id: &str, timestamp: &str) -> ChatMessage {
        ChatMessage {
            id: id.to_string(),
            conversation_id: "apt_1".to_string(),
            sender_id: "u_doctor".to_string(),
            sender_role: "doctor".to_string(),
            message: format!("body-{}", id),
            message_type: message_kinds::TEXT.to_string(),
            file_url: None,
            whatsapp_sid: None,
            read_by: Vec::new(),
            timestamp: timestamp.to_string(),
            deleted: false,
        }
    }

    #[derive(Default)]
    struct MockTransport {
        history: parking_lot::Mutex<Vec<ChatMessage>>,
        fail_next_fetch: AtomicBool,
        posted: parking_lot::Mutex<Vec<OutgoingMessage>>,
        fail_post: bool,
        uploaded: parking_lot::Mutex<Vec<String>>,
        fail_upload: bool,
        read_marks: parking_lot::Mutex<Vec<String>>,
        fail_mark_read: bool,
        whatsapp: parking_lot::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ChatTransport for MockTransport {
        async fn fetch_history(&self, _conversation_id: &str) -> Result<Vec<ChatMessage>> {
            if self.fail_next_fetch.swap(false, Ordering::SeqCst) {
                return Err(ClinichatSDKError::Transport("connection refused".into()));
            }
            Ok(self.history.lock().clone())
        }

        async fn send_message(
            &self,
            _conversation_id: &str,
            outgoing: &OutgoingMessage,
        ) -> Result<()> {
            if self.fail_post {
                return Err(ClinichatSDKError::Http {
                    status: 502,
                    message: "bad gateway".into(),
                });
            }
            self.posted.lock().push(outgoing.clone());
            Ok(())
        }

        async fn upload_file(
            &self,
            _conversation_id: &str,
            filename: &str,
            _mime_type: &str,
            _bytes: Vec<u8>,
        ) -> Result<FileUploadResponse> {
            if self.fail_upload {
                return Err(ClinichatSDKError::Upload("disk full".into()));
            }
            self.uploaded.lock().push(filename.to_string());
            Ok(FileUploadResponse {
                file_url: format!("/chat/download/apt_1/{}", filename),
                file_name: Some(filename.to_string()),
                file_size: None,
            })
        }

        async fn mark_read(&self, message_id: &str) -> Result<()> {
            if self.fail_mark_read {
                return Err(ClinichatSDKError::Transport("timeout".into()));
            }
            self.read_marks.lock().push(message_id.to_string());
            Ok(())
        }

        async fn send_whatsapp(&self, _conversation_id: &str, body: &str) -> Result<()> {
            self.whatsapp.lock().push(body.to_string());
            Ok(())
        }
    }

    struct MockLive {
        state: parking_lot::RwLock<LiveChannelState>,
        sent: parking_lot::Mutex<Vec<OutgoingMessage>>,
        fail_send: bool,
        inbound: tokio::sync::Mutex<Option<mpsc::Receiver<LiveEvent>>>,
    }

    impl MockLive {
        /// 打不开的通道（引擎进入仅轮询模式）
        fn unavailable() -> Self {
            Self {
                state: parking_lot::RwLock::new(LiveChannelState::Closed),
                sent: parking_lot::Mutex::new(Vec::new()),
                fail_send: false,
                inbound: tokio::sync::Mutex::new(None),
            }
        }

        /// 可连接的通道，返回对端发送句柄
        fn connectable() -> (Self, mpsc::Sender<LiveEvent>) {
            let (tx, rx) = mpsc::channel(16);
            let live = Self {
                state: parking_lot::RwLock::new(LiveChannelState::Closed),
                sent: parking_lot::Mutex::new(Vec::new()),
                fail_send: false,
                inbound: tokio::sync::Mutex::new(Some(rx)),
            };
            (live, tx)
        }

        fn with_failing_writes(mut self) -> Self {
            self.fail_send = true;
            self
        }
    }

    #[async_trait]
    impl LiveChannel for MockLive {
        async fn open(&self) -> Result<mpsc::Receiver<LiveEvent>> {
            match self.inbound.lock().await.take() {
                Some(rx) => {
                    *self.state.write() = LiveChannelState::Open;
                    Ok(rx)
                }
                None => {
                    *self.state.write() = LiveChannelState::Errored;
                    Err(ClinichatSDKError::Transport("connect failed".into()))
                }
            }
        }

        async fn send_frame(&self, payload: &OutgoingMessage) -> Result<()> {
            if self.fail_send {
                return Err(ClinichatSDKError::Transport("broken pipe".into()));
            }
            self.sent.lock().push(payload.clone());
            Ok(())
        }

        fn state(&self) -> LiveChannelState {
            *self.state.read()
        }

        async fn close(&self) {
            *self.state.write() = LiveChannelState::Closed;
        }
    }

    fn engine_with(
        transport: Arc<MockTransport>,
        live: Arc<MockLive>,
        pull_interval: Duration,
    ) -> MessageSyncEngine {
        let config = SyncEngineConfig::new("apt_1", "u_patient", "patient")
            .with_pull_interval(pull_interval);
        MessageSyncEngine::new(config, transport, live)
    }

    #[tokio::test]
    async fn test_start_initial_pull_populates_visible() {
        let transport = Arc::new(MockTransport::default());
        *transport.history.lock() = vec![msg("m1", "2024-06-04T10:00:00")];
        let engine = engine_with(
            transport,
            Arc::new(MockLive::unavailable()),
            Duration::from_secs(3),
        );

        engine.start().await.unwrap();
        let visible = engine.visible_messages();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].id, "m1");
        engine.stop().await;
    }

    #[tokio::test]
    async fn test_initial_pull_failure_recovered_by_next_cycle() {
        let transport = Arc::new(MockTransport::default());
        transport.fail_next_fetch.store(true, Ordering::SeqCst);
        *transport.history.lock() = vec![msg("m1", "2024-06-04T10:00:00")];
        let engine = engine_with(
            transport,
            Arc::new(MockLive::unavailable()),
            Duration::from_millis(20),
        );

        // 初始拉取失败不是致命错误
        engine.start().await.unwrap();
        assert_eq!(engine.message_count(), 0);

        // 下个轮询周期补齐
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(engine.message_count(), 1);
        engine.stop().await;
    }

    #[tokio::test]
    async fn test_live_frames_merge_and_malformed_frames_are_dropped() {
        let transport = Arc::new(MockTransport::default());
        let (live, tx) = MockLive::connectable();
        let engine = engine_with(transport, Arc::new(live), Duration::from_secs(30));

        engine.start().await.unwrap();
        assert!(engine.live_channel_state().is_open());

        // 坏帧只丢弃自身
        tx.send(LiveEvent::Frame("{not json".to_string()))
            .await
            .unwrap();
        let frame = serde_json::to_string(&msg("m2", "2024-06-04T10:01:00")).unwrap();
        tx.send(LiveEvent::Frame(frame)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        let visible = engine.visible_messages();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].id, "m2");
        engine.stop().await;
    }

    #[tokio::test]
    async fn test_live_channel_error_degrades_to_pull_only() {
        let transport = Arc::new(MockTransport::default());
        let (live, tx) = MockLive::connectable();
        let live = Arc::new(live);
        let engine = engine_with(transport.clone(), live.clone(), Duration::from_millis(20));

        engine.start().await.unwrap();

        // 通道出错后引擎继续靠轮询工作
        *live.state.write() = LiveChannelState::Errored;
        tx.send(LiveEvent::StateChanged(LiveChannelState::Errored))
            .await
            .unwrap();
        *transport.history.lock() = vec![msg("m1", "2024-06-04T10:00:00")];

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(engine.message_count(), 1);
        engine.stop().await;
    }

    #[tokio::test]
    async fn test_send_prefers_live_channel() {
        let transport = Arc::new(MockTransport::default());
        let (live, _tx) = MockLive::connectable();
        let live = Arc::new(live);
        let engine = engine_with(transport.clone(), live.clone(), Duration::from_secs(30));

        engine.start().await.unwrap();
        engine.send("hello").await.unwrap();

        assert_eq!(live.sent.lock().len(), 1);
        assert!(transport.posted.lock().is_empty());
        // 不做乐观插入：发送成功也不直接进可见集
        assert_eq!(engine.message_count(), 0);
        engine.stop().await;
    }

    #[tokio::test]
    async fn test_send_falls_back_when_live_not_open() {
        let transport = Arc::new(MockTransport::default());
        let live = Arc::new(MockLive::unavailable());
        let engine = engine_with(transport.clone(), live.clone(), Duration::from_secs(30));

        engine.start().await.unwrap();
        engine.send("hello").await.unwrap();

        // 恰好一次 HTTP 投递，零次实时写入
        assert_eq!(transport.posted.lock().len(), 1);
        assert!(live.sent.lock().is_empty());
        engine.stop().await;
    }

    #[tokio::test]
    async fn test_send_falls_back_once_when_live_write_fails() {
        let transport = Arc::new(MockTransport::default());
        let (live, _tx) = MockLive::connectable();
        let live = Arc::new(live.with_failing_writes());
        let engine = engine_with(transport.clone(), live, Duration::from_secs(30));

        engine.start().await.unwrap();
        engine.send("hello").await.unwrap();

        assert_eq!(transport.posted.lock().len(), 1);
        engine.stop().await;
    }

    #[tokio::test]
    async fn test_send_failure_surfaces_and_leaves_visible_unchanged() {
        let transport = Arc::new(MockTransport {
            fail_post: true,
            ..Default::default()
        });
        *transport.history.lock() = vec![msg("m1", "2024-06-04T10:00:00")];
        let engine = engine_with(
            transport,
            Arc::new(MockLive::unavailable()),
            Duration::from_secs(30),
        );

        engine.start().await.unwrap();
        let before = engine.visible_messages();

        let err = engine.send("hello").await.unwrap_err();
        assert!(matches!(err, ClinichatSDKError::Http { status: 502, .. }));
        // 失败的发送不产生幻影消息
        assert_eq!(engine.visible_messages(), before);
        engine.stop().await;
    }

    #[tokio::test]
    async fn test_upload_failure_aborts_before_delivery() {
        let transport = Arc::new(MockTransport {
            fail_upload: true,
            ..Default::default()
        });
        let (live, _tx) = MockLive::connectable();
        let live = Arc::new(live);
        let engine = engine_with(transport.clone(), live.clone(), Duration::from_secs(30));

        engine.start().await.unwrap();
        let result = engine
            .upload_attachment("scan.png", "image/png", vec![0u8; 4])
            .await;

        assert!(result.is_err());
        // 上传失败：两条投递路径都不得被触发
        assert!(transport.posted.lock().is_empty());
        assert!(live.sent.lock().is_empty());
        engine.stop().await;
    }

    #[tokio::test]
    async fn test_upload_then_delivery_with_inferred_kind() {
        let transport = Arc::new(MockTransport::default());
        let engine = engine_with(
            transport.clone(),
            Arc::new(MockLive::unavailable()),
            Duration::from_secs(30),
        );

        engine.start().await.unwrap();
        engine
            .upload_attachment("scan.png", "image/png", vec![0u8; 4])
            .await
            .unwrap();

        let posted = transport.posted.lock();
        assert_eq!(posted.len(), 1);
        assert_eq!(posted[0].message_type, message_kinds::IMAGE);
        assert_eq!(
            posted[0].file_url.as_deref(),
            Some("/chat/download/apt_1/scan.png")
        );
        drop(posted);
        engine.stop().await;
    }

    #[tokio::test]
    async fn test_mark_read_is_best_effort() {
        let failing = Arc::new(MockTransport {
            fail_mark_read: true,
            ..Default::default()
        });
        let engine = engine_with(
            failing.clone(),
            Arc::new(MockLive::unavailable()),
            Duration::from_secs(30),
        );
        engine.start().await.unwrap();

        // 失败被吸收，不上抛
        engine.mark_read("m1").await;
        assert!(failing.read_marks.lock().is_empty());
        engine.stop().await;

        let ok = Arc::new(MockTransport::default());
        let engine = engine_with(
            ok.clone(),
            Arc::new(MockLive::unavailable()),
            Duration::from_secs(30),
        );
        engine.start().await.unwrap();
        engine.mark_read("m1").await;
        assert_eq!(ok.read_marks.lock().as_slice(), &["m1".to_string()]);
        engine.stop().await;
    }

    #[tokio::test]
    async fn test_send_whatsapp_relays_via_transport() {
        let transport = Arc::new(MockTransport::default());
        let engine = engine_with(
            transport.clone(),
            Arc::new(MockLive::unavailable()),
            Duration::from_secs(30),
        );

        engine.start().await.unwrap();
        engine.send_whatsapp("请按时服药").await.unwrap();
        assert_eq!(transport.whatsapp.lock().len(), 1);
        engine.stop().await;
    }

    #[tokio::test]
    async fn test_teardown_discards_inflight_results() {
        let transport = Arc::new(MockTransport::default());
        let engine = engine_with(
            transport,
            Arc::new(MockLive::unavailable()),
            Duration::from_secs(30),
        );

        engine.start().await.unwrap();
        let stale_generation = engine.shared.generation.load(Ordering::SeqCst);
        engine.stop().await;

        // stop 之前发起、之后才完成的拉取与实时帧都不得再合并
        MessageSyncEngine::apply_pull(
            &engine.shared,
            &engine.events,
            "apt_1",
            stale_generation,
            vec![msg("m1", "2024-06-04T10:00:00")],
        )
        .await;
        let frame = serde_json::to_string(&msg("m2", "2024-06-04T10:01:00")).unwrap();
        MessageSyncEngine::apply_live_frame(
            &engine.shared,
            &engine.events,
            "apt_1",
            stale_generation,
            &frame,
        )
        .await;

        assert_eq!(engine.message_count(), 0);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let engine = engine_with(
            Arc::new(MockTransport::default()),
            Arc::new(MockLive::unavailable()),
            Duration::from_secs(30),
        );

        engine.start().await.unwrap();
        engine.stop().await;
        engine.stop().await;
        assert_eq!(engine.live_channel_state(), LiveChannelState::Closed);
    }

    #[tokio::test]
    async fn test_merge_events_emitted() {
        let transport = Arc::new(MockTransport::default());
        *transport.history.lock() = vec![msg("m1", "2024-06-04T10:00:00")];
        let engine = engine_with(
            transport,
            Arc::new(MockLive::unavailable()),
            Duration::from_secs(30),
        );

        let mut receiver = engine.subscribe_events();
        engine.start().await.unwrap();

        let first = receiver.recv().await.unwrap();
        assert_eq!(first.event_type(), "message_received");
        let second = receiver.recv().await.unwrap();
        match second {
            ChatEvent::VisibleMessagesChanged { count, .. } => assert_eq!(count, 1),
            other => panic!("unexpected event: {:?}", other),
        }
        engine.stop().await;
    }
}
