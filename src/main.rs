use chrono::Utc;
use clap::{Parser, Subcommand};
use custos_vault::channel::{Channel, DiscordClient};
use custos_vault::codec;
use custos_vault::config::VaultConfig;
use custos_vault::expiry::Unbanner;
use custos_vault::reconstructor;
use custos_vault::vault::Vault;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "custos-vault")]
#[command(about = "Moderation state persisted in a Discord channel", long_about = None)]
#[command(version)]
struct Cli {
    /// YAML 配置文件
    #[arg(short, long, env = "CUSTOS_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// 加载状态，保持运行直到 Ctrl-C
    Run,
    /// 只读：扫描频道并打印重建结果
    Inspect {
        /// 输出完整的 JSON 文档
        #[arg(long)]
        json: bool,
    },
    /// 加载后立即写一份完整快照
    Backup,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "custos_vault=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = VaultConfig::load(cli.config.as_deref())?;
    let client = Arc::new(DiscordClient::from_config(&config)?);

    match cli.command {
        Command::Run => {
            let unbanner: Arc<dyn Unbanner> = client.clone();
            let vault = Vault::open(&config, client, Some(unbanner)).await;
            tokio::signal::ctrl_c().await?;
            info!("收到 Ctrl-C，正在停止");
            vault.shutdown().await;
        }
        Command::Inspect { json } => {
            let channel: &dyn Channel = client.as_ref();
            let loaded = reconstructor::load(channel, config.history_limit).await;
            if json {
                let save_id = loaded
                    .metadata
                    .as_ref()
                    .map(|m| m.save_id.clone())
                    .unwrap_or_default();
                let encoded = codec::encode(&loaded.state, &save_id, Utc::now())?;
                println!("{}", encoded.document);
            } else {
                println!("source:  {}", loaded.source);
                if let Some(metadata) = &loaded.metadata {
                    println!("version: {}", metadata.version);
                    println!("saved:   {}", metadata.last_updated);
                    println!("hash:    {}", metadata.content_hash);
                }
                println!("state:   {}", loaded.state.summary());
            }
        }
        Command::Backup => {
            let vault = Vault::open(&config, client, None).await;
            match vault.save_now().await {
                Some(report) => println!(
                    "✅ saved {} ({} parts, hash {})",
                    report.save_id, report.parts, report.fingerprint
                ),
                None => println!("❌ backup failed, see log"),
            }
            vault.shutdown().await;
        }
    }
    Ok(())
}
