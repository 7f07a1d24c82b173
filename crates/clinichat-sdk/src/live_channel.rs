//! 实时通道模块 - WebSocket 推送/写入
//!
//! 实时通道是低延迟但尽力而为的传输：帧可能在重连间隙静默丢失，
//! 正确性由周期拉取兜底。通道断开或出错后不自动重连，
//! 引擎降级为仅轮询模式，重连由持有者走一轮 stop/start。
//!
//! 引擎通过 [`LiveChannel`] trait 消费本模块，测试时可替换为内存实现。

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::connection_state::LiveChannelState;
use crate::error::{ClinichatSDKError, Result};
use crate::message::OutgoingMessage;

/// 实时通道入站事件
#[derive(Debug)]
pub enum LiveEvent {
    /// 一帧原始 JSON 载荷（解析由引擎负责，坏帧只丢弃自身）
    Frame(String),
    /// 通道状态变化；进入终态后不再有帧
    StateChanged(LiveChannelState),
}

/// 实时通道抽象
#[async_trait]
pub trait LiveChannel: Send + Sync {
    /// 建立连接并返回入站事件流
    ///
    /// 失败时通道进入 Errored，调用方应降级为仅轮询模式
    async fn open(&self) -> Result<mpsc::Receiver<LiveEvent>>;

    /// 写入一帧出站载荷（与 HTTP 回退相同的逻辑载荷）
    async fn send_frame(&self, payload: &OutgoingMessage) -> Result<()>;

    /// 当前通道状态
    fn state(&self) -> LiveChannelState;

    /// 关闭连接（幂等）
    async fn close(&self);
}

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// WebSocket 实时通道
///
/// 每个会话一条连接，地址为 `{ws_base}/chat/ws/{conversation_id}?token={auth}`；
/// 鉴权凭证经构造参数注入，不读取任何环境全局量
pub struct WsLiveChannel {
    url: String,
    state: Arc<parking_lot::RwLock<LiveChannelState>>,
    writer: Mutex<Option<WsSink>>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
}

impl WsLiveChannel {
    /// 创建 WebSocket 通道（未连接）
    pub fn new(ws_base_url: &str, conversation_id: &str, auth_token: &str) -> Self {
        let url = format!(
            "{}/chat/ws/{}?token={}",
            ws_base_url.trim_end_matches('/'),
            conversation_id,
            auth_token
        );

        Self {
            url,
            state: Arc::new(parking_lot::RwLock::new(LiveChannelState::Closed)),
            writer: Mutex::new(None),
            reader_task: Mutex::new(None),
        }
    }

    fn set_state(&self, new_state: LiveChannelState) {
        *self.state.write() = new_state;
    }

    /// 读循环：把文本帧转发给引擎，终态时上报状态后退出
    async fn read_loop(
        mut source: WsSource,
        state: Arc<parking_lot::RwLock<LiveChannelState>>,
        tx: mpsc::Sender<LiveEvent>,
    ) {
        while let Some(frame) = source.next().await {
            match frame {
                Ok(WsMessage::Text(text)) => {
                    if tx.send(LiveEvent::Frame(text)).await.is_err() {
                        // 接收端已丢弃，引擎已停止
                        return;
                    }
                }
                Ok(WsMessage::Close(_)) => {
                    info!("WebSocket 对端关闭连接");
                    *state.write() = LiveChannelState::Closed;
                    let _ = tx
                        .send(LiveEvent::StateChanged(LiveChannelState::Closed))
                        .await;
                    return;
                }
                Ok(_) => {
                    // Ping/Pong/二进制帧与消息协议无关，忽略
                }
                Err(e) => {
                    warn!("WebSocket 读取出错: {}", e);
                    *state.write() = LiveChannelState::Errored;
                    let _ = tx
                        .send(LiveEvent::StateChanged(LiveChannelState::Errored))
                        .await;
                    return;
                }
            }
        }

        // 流自然结束按正常关闭处理
        *state.write() = LiveChannelState::Closed;
        let _ = tx
            .send(LiveEvent::StateChanged(LiveChannelState::Closed))
            .await;
    }
}

#[async_trait]
impl LiveChannel for WsLiveChannel {
    async fn open(&self) -> Result<mpsc::Receiver<LiveEvent>> {
        self.set_state(LiveChannelState::Connecting);

        let (stream, _) = connect_async(self.url.as_str()).await.map_err(|e| {
            self.set_state(LiveChannelState::Errored);
            ClinichatSDKError::Transport(format!("WebSocket 连接失败: {}", e))
        })?;

        let (sink, source) = stream.split();
        *self.writer.lock().await = Some(sink);
        self.set_state(LiveChannelState::Open);
        info!("🔗 WebSocket 已连接");

        let (tx, rx) = mpsc::channel(64);
        let handle = tokio::spawn(Self::read_loop(source, self.state.clone(), tx));
        *self.reader_task.lock().await = Some(handle);

        Ok(rx)
    }

    async fn send_frame(&self, payload: &OutgoingMessage) -> Result<()> {
        let text = serde_json::to_string(payload)?;

        let mut guard = self.writer.lock().await;
        let sink = guard.as_mut().ok_or(ClinichatSDKError::NotConnected)?;

        sink.send(WsMessage::Text(text)).await.map_err(|e| {
            self.set_state(LiveChannelState::Errored);
            ClinichatSDKError::Transport(format!("实时帧写入失败: {}", e))
        })?;

        debug!("📡 实时帧已写入");
        Ok(())
    }

    fn state(&self) -> LiveChannelState {
        *self.state.read()
    }

    async fn close(&self) {
        if let Some(handle) = self.reader_task.lock().await.take() {
            handle.abort();
        }

        if let Some(mut sink) = self.writer.lock().await.take() {
            let _ = sink.send(WsMessage::Close(None)).await;
        }

        // 出错状态保留给持有者观察，正常路径归位为 Closed
        let mut state = self.state.write();
        if *state != LiveChannelState::Errored {
            *state = LiveChannelState::Closed;
        }
    }
}
