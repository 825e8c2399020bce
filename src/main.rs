use anyhow::Context;
use chrono::{DateTime, Local, Utc};
use clap::{Parser, Subcommand};
use rustyline::{error::ReadlineError, DefaultEditor};
use station_explorer::{
    config::{Config, LoggingConfig},
    db::MssqlStore,
    filter::FilterRequest,
    query_compiler::SearchQueryCompiler,
    server::{self, AppState},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "station-explorer", version, about = "TS70 station explorer")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// 启动 HTTP 服务（默认）
    Serve,
    /// 交互式预览：每行输入一个筛选 JSON，输出生成的 SQL 与参数
    Preview {
        /// 固定的参考时间（RFC 3339），默认使用当前时间
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load().context("无法加载配置")?;
    init_logging(&config.logging);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Preview { at } => preview(&config, at),
    }
}

fn init_logging(logging: &LoggingConfig) {
    let mut env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.default_level));

    if let Some(dep_filter) = &logging.dependency_filter {
        let filter_string = format!("{},{}", env_filter, dep_filter);
        env_filter = EnvFilter::try_new(&filter_string).unwrap_or(env_filter);
    }

    let registry = tracing_subscriber::registry().with(env_filter);
    if logging.format.eq_ignore_ascii_case("json") {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().with_target(false)).init();
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let store = MssqlStore::connect(&config.database)
        .await
        .context("无法初始化数据库连接池")?;
    let state = AppState::new(&config, Arc::new(store));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("无法监听 {}", addr))?;
    server::run(listener, state).await?;
    Ok(())
}

fn preview(config: &Config, at: Option<DateTime<Utc>>) -> anyhow::Result<()> {
    let compiler = SearchQueryCompiler::from_catalog(config.query.clone());
    let mut editor = DefaultEditor::new()?;

    println!("--- TS70 查询预览 ---");
    println!("每行输入一个筛选 JSON，例如：");
    println!(r#"{{"rangeKey": "LAST_HOUR", "stationFilters": [{{"key": "OP10", "statuses": ["OK"]}}]}}"#);
    println!("Ctrl-D 退出\n");

    loop {
        match editor.readline("filter> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                editor.add_history_entry(line)?;

                let request: FilterRequest = match serde_json::from_str(line) {
                    Ok(request) => request,
                    Err(e) => {
                        println!("✗ 无法解析筛选条件: {}", e);
                        continue;
                    }
                };
                let descriptor = match at {
                    Some(at) => compiler.build_search_query(&request, &at),
                    None => compiler.build_search_query(&request, &Local::now()),
                };
                println!("{}", serde_json::to_string_pretty(&descriptor)?);
            }
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        }
    }

    Ok(())
}
