use anyhow::{bail, Context};
use clap::Parser;
use epic_sync::cli::{Cli, Command, ConfigCommand, SyncArgs};
use epic_sync::config::{config_dir, ClientConfig};
use epic_sync::logging::init_logging;
use epic_sync::{DataClient, SyncOptions, TransferCallback, TransferResult};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let dir = config_dir();
    let config = cli.apply_to(ClientConfig::load(&dir).with_env());

    // 日志 guard 必须存活到进程结束
    let _guard = init_logging(&dir, &config.log, cli.verbose);

    match run(cli, config).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, config: ClientConfig) -> anyhow::Result<ExitCode> {
    // config 子命令不需要 token
    let client = || DataClient::from_config(&config).context("failed to create data client");

    match cli.command {
        Command::Config(cmd) => return run_config(&cmd, config.clone()),
        Command::Ls { path, json } => {
            let objects = client()?
                .ls(&path)
                .await
                .with_context(|| format!("failed to list {}", path))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&objects)?);
                return Ok(ExitCode::SUCCESS);
            }
            for obj in objects {
                if obj.folder {
                    println!("{:>12}  {:<25}  {}", "-", "-", obj.obj_path);
                } else {
                    println!(
                        "{:>12}  {:<25}  {}",
                        obj.size.unwrap_or_default(),
                        obj.last_modified.unwrap_or_default(),
                        obj.obj_path
                    );
                }
            }
        }
        Command::Sync(args) => return run_sync(&client()?, args).await,
        Command::Download { path, destination } => {
            let local = client()?
                .download_file(&path, &destination)
                .await
                .with_context(|| format!("failed to download {}", path))?;
            println!("{} -> {}", path, local.display());
        }
        Command::Upload { file, path } => {
            let remote = client()?
                .upload_file(&file, &path)
                .await
                .with_context(|| format!("failed to upload {}", file.display()))?;
            println!("{} -> {}", file.display(), remote);
        }
        Command::Rm { path, dry_run } => {
            let report = client()?
                .delete(&path, dry_run)
                .await
                .with_context(|| format!("failed to delete {}", path))?;
            for deleted in &report.deleted {
                println!("{}{}", if dry_run { "(dry run) " } else { "" }, deleted);
            }
            for failed in &report.failed {
                eprintln!("failed: {} ({})", failed.key, failed.error);
            }
            if !report.failed.is_empty() {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Meta { path } => {
            let meta = client()?
                .get_file_meta_data(&path)
                .await
                .with_context(|| format!("failed to read metadata of {}", path))?;
            let mut entries: Vec<_> = meta.into_iter().collect();
            entries.sort();
            for (key, value) in entries {
                println!("{}: {}", key, value);
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

async fn run_sync(client: &DataClient, args: SyncArgs) -> anyhow::Result<ExitCode> {
    let cancel = CancellationToken::new();

    // Ctrl-C 只停止派发新条目，进行中的传输会完成
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("收到 Ctrl-C，停止派发新的传输");
            eprintln!("cancelling: waiting for in-flight transfers to finish...");
            signal_cancel.cancel();
        }
    });

    let callback: TransferCallback = Arc::new(|r: &TransferResult| {
        let status = match (r.transferred, r.dry_run) {
            (true, _) => "copied",
            (false, true) => "dry-run",
            (false, false) => "skipped",
        };
        println!("{:>8}  {} -> {}", status, r.source, r.destination);
    });

    let mut options = SyncOptions {
        dry_run: args.dry_run,
        overwrite_existing: args.overwrite,
        exclude_patterns: args.exclude,
        ..Default::default()
    }
    .callback(callback)
    .cancel(cancel);
    if let Some(threads) = args.threads {
        options = options.threads(usize::from(threads));
    }

    let report = client
        .sync(&args.source, &args.target, options)
        .await
        .with_context(|| format!("sync {} -> {} failed", args.source, args.target))?;

    for failure in &report.failures {
        eprintln!("  failed  {}: {}", failure.item, failure.error);
    }
    println!(
        "{}: {} items, {} transferred, {} skipped, {} failed{} ({} ms)",
        report.direction,
        report.total,
        report.transferred,
        report.skipped,
        report.failures.len(),
        if report.cancelled { ", cancelled" } else { "" },
        report.duration_ms
    );

    Ok(if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn run_config(cmd: &ConfigCommand, config: ClientConfig) -> anyhow::Result<ExitCode> {
    let dir = config_dir();
    match cmd {
        ConfigCommand::Show => {
            let mut shown = config;
            if shown.token.is_some() {
                shown.token = Some("********".to_string());
            }
            println!("# {}", dir.join(epic_sync::config::CONFIG_FILE).display());
            println!("{}", serde_json::to_string_pretty(&shown)?);
        }
        ConfigCommand::SetToken { token } => {
            if token.trim().is_empty() {
                bail!("token must not be empty");
            }
            // 只写入 token，不把环境变量/命令行覆盖写回文件
            let mut stored = ClientConfig::load(&dir);
            stored.token = Some(token.trim().to_string());
            stored
                .save(&dir)
                .with_context(|| format!("failed to write {}", dir.display()))?;
            println!("token saved to {}", dir.join(epic_sync::config::CONFIG_FILE).display());
        }
    }
    Ok(ExitCode::SUCCESS)
}
