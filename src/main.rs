use clap::Parser;
use mirrortools_lib::logging::{get_log_dir, LogConfig, SizeRotatingWriter};
use mirrortools_lib::{MirrorConfig, MirrorEngine, RunOptions, RunStatus};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(name = "mirrortools")]
#[command(version)]
#[command(about = "把远程存储上的文件和目录树镜像到本地")]
#[command(
    long_about = "mirrortools - 远程目录镜像工具\n\n\
    引用格式为 <system>://<path>，system 对应配置文件中的存储系统名。\n\
    目录引用配合 --recursive 递归下载整棵树，空目录也会在本地创建。"
)]
struct Cli {
    /// 远程引用，例如 tacc://data/run1
    reference: String,

    /// 本地目标目录
    #[arg(default_value = ".")]
    dest: PathBuf,

    /// 递归下载目录树
    #[arg(short, long)]
    recursive: bool,

    /// 单文件模式下的另存文件名
    #[arg(short = 'f', long)]
    rename: Option<String>,

    /// 配置文件路径
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 最大并发传输数（覆盖配置）
    #[arg(short, long)]
    jobs: Option<usize>,

    /// 以 JSON 输出运行报告
    #[arg(long)]
    json: bool,

    /// 输出调试日志到控制台
    #[arg(short, long)]
    verbose: bool,
}

/// 初始化日志系统
fn init_logging(config: &LogConfig, verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        config.tracing_level()
    };

    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("opendal=warn".parse().unwrap())
        .add_directive("hyper=warn".parse().unwrap())
        .add_directive("reqwest=warn".parse().unwrap());

    if config.enabled {
        let log_dir = get_log_dir();
        let _ = std::fs::create_dir_all(&log_dir);

        if let Ok(file_writer) = SizeRotatingWriter::new(&log_dir, config.max_size_mb) {
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false);

            let console_layer = if verbose {
                Some(
                    tracing_subscriber::fmt::layer()
                        .with_target(false)
                        .with_thread_ids(false)
                        .with_thread_names(false),
                )
            } else {
                None
            };

            let subscriber = tracing_subscriber::registry()
                .with(env_filter)
                .with(file_layer)
                .with(console_layer);

            let _ = tracing::subscriber::set_global_default(subscriber);
            return;
        }
    }

    // 文件日志关闭或创建失败，回退到控制台
    let console_layer = if verbose {
        Some(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
    } else {
        None
    };
    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer);
    let _ = tracing::subscriber::set_global_default(subscriber);
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut config = match MirrorConfig::load_or_default(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("配置错误: {:#}", e);
            std::process::exit(RunStatus::TotalFailure.exit_code());
        }
    };

    if let Some(jobs) = cli.jobs {
        config.transfer.max_concurrent_transfers = jobs.max(1);
    }

    init_logging(&config.log, cli.verbose);

    let engine = MirrorEngine::new(config);

    // Ctrl+C 触发取消，正在进行的传输完成或清理后退出
    let cancel = engine.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("收到中断信号，正在取消同步...");
            cancel.store(true, Ordering::SeqCst);
        }
    });

    let report = engine
        .run(
            &cli.reference,
            &cli.dest,
            RunOptions {
                recursive: cli.recursive,
                rename: cli.rename,
            },
        )
        .await;

    if cli.json {
        match serde_json::to_string_pretty(&report) {
            Ok(s) => println!("{}", s),
            Err(e) => eprintln!("报告序列化失败: {}", e),
        }
    } else {
        println!(
            "同步{}: 传输 {}, 跳过 {}, 失败 {}, 新建目录 {} ({} 字节)",
            match report.status {
                RunStatus::AllSucceeded => "完成",
                _ => "失败",
            },
            report.filesTransferred,
            report.filesSkipped,
            report.filesFailed,
            report.dirsCreated,
            report.bytesTransferred
        );
        for error in &report.errors {
            eprintln!("  失败: {}", error);
        }
    }

    std::process::exit(report.status.exit_code());
}
