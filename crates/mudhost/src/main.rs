//! MUD 終端機主程式

mod config;
mod logging;
mod terminal;

use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use std::rc::Rc;
use std::time::Duration;

use clap::Parser;
use mudcore::screen::Style;
use mudcore::{Atlas, MultiSessionHost, PluginCatalog};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use config::ClientConfig;
use terminal::Terminal;

/// 排程間隔
const TICK: Duration = Duration::from_millis(10);
/// 啟動時建立、不連線的本地 session
const CONSOLE: &str = "main";

#[derive(Debug, Parser)]
#[command(name = "mudhost", version, about = "可程式化的多連線 MUD 客戶端")]
struct Cli {
    /// 設定檔路徑
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// 把日誌送到除錯主控台
    #[arg(short, long, value_name = "HOST:PORT")]
    debug: Option<String>,

    /// 啟動後自動連線
    #[arg(short, long, value_name = "NAME")]
    start: Option<String>,

    /// 定期記錄每個 session 的引擎狀態
    #[arg(short, long)]
    inspector: bool,

    /// 提高日誌等級（可重複）
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = logging::init(cli.verbose, cli.debug.as_deref()) {
        eprintln!("無法連線到除錯主控台: {}", e);
        return ExitCode::FAILURE;
    }
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("啟動失敗: {}", e);
            eprintln!("啟動失敗: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn inspect(host: &MultiSessionHost) {
    for summary in host.summaries() {
        let Some(session) = host.session(&summary.name) else {
            continue;
        };
        info!(
            target: "inspector",
            "{} {:?} actions={} tickers={} queued={} aliases={} msdp={}",
            summary.name,
            summary.state,
            session.actions.len(),
            session.tickers.len(),
            session.queue.pending().len(),
            session.aliases.len(),
            session.variables.names().len(),
        );
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let path = cli.config.clone().unwrap_or_else(ClientConfig::default_path);
    let config = ClientConfig::load(&path)?;
    info!("設定檔: {}", path.display());

    let mut atlas = match &config.atlas_path {
        Some(dir) => Atlas::open(dir)?,
        None => Atlas::in_memory(),
    };
    atlas.terrain.merge(&config.terrain_weights);

    let terminal = Terminal::new();
    let (net_tx, mut net_rx) = mpsc::unbounded_channel();
    let mut host = MultiSessionHost::new(
        atlas.shared(),
        Rc::new(PluginCatalog::standard()),
        config.profiles(),
        terminal.factory(),
        net_tx,
    );
    host.create_session(config.session(CONSOLE))?;

    let mut starts = config.auto_connect.clone();
    starts.extend(cli.start.clone());
    for name in starts {
        let profile = host.profile(&name);
        if let Err(e) = host.connect(profile).await {
            warn!("自動連線 {} 失敗: {}", name, e);
            terminal.notice(&format!("自動連線 {} 失敗: {}", name, e), Style::Error);
        }
    }
    terminal.follow(&host);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut ticker = interval(TICK);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut inspector = interval(Duration::from_secs(5));

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if let Err(e) = host.input(&line) {
                        terminal.notice(&e.to_string(), Style::Error);
                    }
                }
                Ok(None) => {
                    info!("標準輸入結束");
                    break;
                }
                Err(e) => {
                    error!("讀取標準輸入失敗: {}", e);
                    break;
                }
            },
            Some(message) = net_rx.recv() => host.on_net_message(message),
            _ = ticker.tick() => host.tick(Instant::now().into_std()),
            _ = inspector.tick(), if cli.inspector => inspect(&host),
            _ = tokio::signal::ctrl_c() => {
                info!("收到中斷訊號");
                break;
            }
        }
        host.process_requests().await;
        terminal.follow(&host);
        if host.should_quit() {
            break;
        }
    }

    host.shutdown();
    Ok(())
}
