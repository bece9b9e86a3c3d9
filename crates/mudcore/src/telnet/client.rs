//! Telnet 客戶端
//!
//! 非同步 Telnet 連線管理：建立 TCP 連線，並為每個 session 啟動一個
//! 連線任務，負責讀寫 socket 與閒置（無 GA 提示字元）判定。

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, info, trace, warn};

/// Telnet 客戶端錯誤
#[derive(Debug, Error)]
pub enum TelnetError {
    #[error("連線失敗: {0}")]
    ConnectionFailed(#[from] io::Error),

    #[error("連線逾時")]
    Timeout,

    #[error("未連線")]
    NotConnected,

    #[error("DNS 解析失敗: {0}")]
    DnsResolutionFailed(String),
}

/// 連線狀態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// 連線中斷（對方關閉或寫入失敗）
    Lost,
}

/// Telnet 客戶端配置
#[derive(Debug, Clone)]
pub struct TelnetConfig {
    /// 連線逾時（秒）
    pub connect_timeout: Duration,
    /// 讀取緩衝區大小
    pub read_buffer_size: usize,
    /// 收到資料後多久沒有後續位元組即視為提示字元
    pub prompt_idle: Duration,
}

impl Default for TelnetConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            read_buffer_size: 8192,
            prompt_idle: Duration::from_millis(50),
        }
    }
}

/// 連線任務回報給 session 的事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetEvent {
    /// 從 socket 讀到的原始位元組
    Data(Vec<u8>),
    /// 收到資料後閒置超過門檻
    Idle,
    /// 對方關閉連線
    Closed,
    /// 讀寫錯誤，連線已終止
    Error(String),
}

/// 帶有 session 名稱的網路事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetMessage {
    pub session: String,
    pub event: NetEvent,
}

/// 連線任務的控制代碼
///
/// drop 時會中止任務。
#[derive(Debug)]
pub struct ConnectionHandle {
    writer: mpsc::UnboundedSender<Vec<u8>>,
    task: JoinHandle<()>,
}

impl ConnectionHandle {
    /// 寫入通道（交給 session 使用）
    pub fn writer(&self) -> mpsc::UnboundedSender<Vec<u8>> {
        self.writer.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// 將位元組格式化為十六進位字串（除錯用）
pub fn hex_dump(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Telnet 客戶端
pub struct TelnetClient {
    config: TelnetConfig,
    state: ConnectionState,
}

impl TelnetClient {
    /// 創建新的 Telnet 客戶端
    pub fn new(config: TelnetConfig) -> Self {
        Self {
            config,
            state: ConnectionState::Disconnected,
        }
    }

    /// 獲取連線狀態
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn config(&self) -> &TelnetConfig {
        &self.config
    }

    /// 連線到 MUD 伺服器
    ///
    /// # Arguments
    /// * `host` - 主機名稱或 IP
    /// * `port` - 連接埠
    pub async fn connect(&mut self, host: &str, port: u16) -> Result<TcpStream, TelnetError> {
        self.state = ConnectionState::Connecting;
        info!("正在連線到 {}:{}", host, port);

        let result = self.dial(host, port).await;
        self.state = match result {
            Ok(_) => ConnectionState::Connected,
            Err(_) => ConnectionState::Disconnected,
        };
        result
    }

    async fn dial(&self, host: &str, port: u16) -> Result<TcpStream, TelnetError> {
        // 解析主機名稱
        let addr = format!("{}:{}", host, port);
        let socket_addrs: Vec<SocketAddr> = tokio::net::lookup_host(&addr)
            .await
            .map_err(|e| TelnetError::DnsResolutionFailed(e.to_string()))?
            .collect();

        let first = socket_addrs.first().ok_or_else(|| {
            TelnetError::DnsResolutionFailed(format!("無法解析主機: {}", host))
        })?;

        debug!("已解析到位址: {:?}", socket_addrs);

        let stream = timeout(self.config.connect_timeout, TcpStream::connect(first))
            .await
            .map_err(|_| TelnetError::Timeout)?
            .map_err(TelnetError::ConnectionFailed)?;

        stream.set_nodelay(true)?;

        info!("已連線到 {}:{}", host, port);
        Ok(stream)
    }

    /// 為已建立的串流啟動連線任務
    pub fn spawn<S>(
        &self,
        session: impl Into<String>,
        stream: S,
        events: mpsc::UnboundedSender<NetMessage>,
    ) -> ConnectionHandle
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (writer, writes) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_connection(
            session.into(),
            stream,
            events,
            writes,
            self.config.clone(),
        ));
        ConnectionHandle { writer, task }
    }
}

impl Default for TelnetClient {
    fn default() -> Self {
        Self::new(TelnetConfig::default())
    }
}

/// 連線任務主迴圈：socket 讀取、寫入通道、閒置計時三路 select
pub async fn run_connection<S>(
    session: String,
    stream: S,
    events: mpsc::UnboundedSender<NetMessage>,
    mut writes: mpsc::UnboundedReceiver<Vec<u8>>,
    config: TelnetConfig,
) where
    S: AsyncRead + AsyncWrite,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    let mut buffer = vec![0u8; config.read_buffer_size];
    let idle = sleep(config.prompt_idle);
    tokio::pin!(idle);
    let mut pending = false;

    let emit = |event: NetEvent| {
        events
            .send(NetMessage {
                session: session.clone(),
                event,
            })
            .is_ok()
    };

    loop {
        tokio::select! {
            result = reader.read(&mut buffer) => match result {
                Ok(0) => {
                    info!("[{}] 伺服器關閉連線", session);
                    emit(NetEvent::Closed);
                    break;
                }
                Ok(n) => {
                    trace!("[{}] READ_RAW: [{}]", session, hex_dump(&buffer[..n]));
                    if !emit(NetEvent::Data(buffer[..n].to_vec())) {
                        warn!("[{}] 接收端已關閉", session);
                        break;
                    }
                    pending = true;
                    idle.as_mut().reset(Instant::now() + config.prompt_idle);
                }
                Err(e) => {
                    error!("[{}] 讀取錯誤: {}", session, e);
                    emit(NetEvent::Error(e.to_string()));
                    break;
                }
            },
            _ = &mut idle, if pending => {
                pending = false;
                if !emit(NetEvent::Idle) {
                    break;
                }
            }
            outgoing = writes.recv() => match outgoing {
                Some(data) => {
                    trace!("[{}] WRITE_RAW: [{}]", session, hex_dump(&data));
                    let written = match writer.write_all(&data).await {
                        Ok(()) => writer.flush().await,
                        Err(e) => Err(e),
                    };
                    if let Err(e) = written {
                        error!("[{}] 寫入錯誤: {}", session, e);
                        emit(NetEvent::Error(e.to_string()));
                        break;
                    }
                }
                None => {
                    debug!("[{}] 寫入通道已關閉，結束連線任務", session);
                    break;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = TelnetClient::default();
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_config_default() {
        let config = TelnetConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
        assert_eq!(config.read_buffer_size, 8192);
        assert_eq!(config.prompt_idle, Duration::from_millis(50));
    }

    #[test]
    fn test_hex_dump() {
        assert_eq!(hex_dump(&[0xFF, 0xFB, 0x45]), "FF FB 45");
    }

    #[tokio::test]
    async fn test_connection_forwards_data_then_closed() {
        let mock = tokio_test::io::Builder::new().read(b"hello\n").build();
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let (_writer, writes) = mpsc::unbounded_channel();
        run_connection("t".into(), mock, events_tx, writes, TelnetConfig::default()).await;

        let first = events_rx.recv().await.unwrap();
        assert_eq!(first.session, "t");
        assert_eq!(first.event, NetEvent::Data(b"hello\n".to_vec()));
        assert_eq!(events_rx.recv().await.unwrap().event, NetEvent::Closed);
    }

    #[tokio::test]
    async fn test_connection_writes_outgoing() {
        let mock = tokio_test::io::Builder::new().write(b"look\n").build();
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let (writer, writes) = mpsc::unbounded_channel();
        writer.send(b"look\n".to_vec()).unwrap();
        run_connection("t".into(), mock, events_tx, writes, TelnetConfig::default()).await;
        assert_eq!(events_rx.recv().await.unwrap().event, NetEvent::Closed);
    }

    #[tokio::test]
    async fn test_idle_fires_after_partial_prompt() {
        let mock = tokio_test::io::Builder::new()
            .read(b"Name: ")
            .wait(Duration::from_millis(200))
            .build();
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let (_writer, writes) = mpsc::unbounded_channel();
        let config = TelnetConfig {
            prompt_idle: Duration::from_millis(20),
            ..TelnetConfig::default()
        };
        run_connection("t".into(), mock, events_tx, writes, config).await;

        assert_eq!(
            events_rx.recv().await.unwrap().event,
            NetEvent::Data(b"Name: ".to_vec())
        );
        assert_eq!(events_rx.recv().await.unwrap().event, NetEvent::Idle);
        assert_eq!(events_rx.recv().await.unwrap().event, NetEvent::Closed);
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let mut client = TelnetClient::new(TelnetConfig {
            connect_timeout: Duration::from_secs(2),
            ..TelnetConfig::default()
        });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let result = client.connect("127.0.0.1", port).await;
        assert!(result.is_err());
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }
}
