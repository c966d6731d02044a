use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use relayer_core::{
    chain_adapter::{ChainClient, JsonRpcClient},
    relayer::{GasOracleRelay, GasOracleRelayer, MessageRelay, MessageRelayer, Relayer},
    sender::Sender,
    shutdown::ShutdownHandle,
    store::{InMemoryStore, RecordStore},
    Config, L1Block, L1Message,
};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 验证并解析配置文件
    ValidateConfig {
        /// 配置文件路径
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,
    },
    /// 启动消息中继和 gas oracle 中继
    Start {
        /// 配置文件路径
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,
        /// 预先载入的待中继消息（JSON 数组）
        #[arg(long, value_name = "FILE")]
        messages: Option<PathBuf>,
        /// 预先载入的待同步区块（JSON 数组）
        #[arg(long, value_name = "FILE")]
        blocks: Option<PathBuf>,
    },
}

fn load_records<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志，同时接收核心库通过 log 输出的记录
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::ValidateConfig { config } => {
            info!("Validating config file: {:?}", config);
            let config = Config::load(config)?;
            println!("配置文件验证成功!");
            println!("配置内容概要:");
            println!("- 目标链: {} ({}) {}", config.chain.name, config.chain.id, config.chain.rpc_url);
            println!("- 合约:");
            println!("  - messenger: {}", config.contracts.messenger_address);
            println!("  - gas price oracle: {}", config.contracts.gas_price_oracle_address);
            println!("- 发送账户:");
            println!(
                "  - 消息: {} (确认深度 {})",
                config.message_sender.from, config.message_sender.confirmations
            );
            println!(
                "  - gas oracle: {} (确认深度 {})",
                config.gas_oracle_sender.from, config.gas_oracle_sender.confirmations
            );
            println!("- 中继器配置:");
            println!("  - 轮询间隔: {}毫秒", config.relayer.poll_interval_ms);
            println!("  - 最大重试次数: {}", config.relayer.max_retries);
            println!("  - 重试延迟: {}毫秒", config.relayer.retry_delay_ms);
            println!("  - 批量大小: {}", config.relayer.batch_size);
            Ok(())
        }
        Commands::Start {
            config,
            messages,
            blocks,
        } => {
            info!("Starting relayer with config {:?}", config);
            let config = Config::load(config)?;

            let store = InMemoryStore::new();
            if let Some(path) = messages {
                let records: Vec<L1Message> = load_records(&path)?;
                info!("Loaded {} messages from {:?}", records.len(), path);
                RecordStore::<L1Message>::insert(&store, records).await?;
            }
            if let Some(path) = blocks {
                let records: Vec<L1Block> = load_records(&path)?;
                info!("Loaded {} blocks from {:?}", records.len(), path);
                RecordStore::<L1Block>::insert(&store, records).await?;
            }

            let client: Arc<dyn ChainClient> = Arc::new(JsonRpcClient::new(&config.chain)?);
            let message_sender = Arc::new(Sender::from_config(
                "message-sender",
                config.message_sender.clone(),
                client.clone(),
            ));
            let gas_oracle_sender = Arc::new(Sender::from_config(
                "gas-oracle-sender",
                config.gas_oracle_sender.clone(),
                client,
            ));

            let message_relayer: Arc<MessageRelayer> = Arc::new(
                Relayer::new(
                    MessageRelay::from_config(&config.contracts),
                    config.relayer.clone(),
                    Arc::new(store.clone()),
                    message_sender.clone(),
                )
                .await?,
            );
            let gas_oracle_relayer: Arc<GasOracleRelayer> = Arc::new(
                Relayer::new(
                    GasOracleRelay::from_config(&config.contracts),
                    config.relayer.clone(),
                    Arc::new(store),
                    gas_oracle_sender.clone(),
                )
                .await?,
            );

            let shutdown = ShutdownHandle::new();
            let tasks = vec![
                tokio::spawn(message_sender.run(shutdown.subscribe())),
                tokio::spawn(gas_oracle_sender.run(shutdown.subscribe())),
            ];
            let relayers = vec![
                tokio::spawn(message_relayer.run(shutdown.subscribe())),
                tokio::spawn(gas_oracle_relayer.run(shutdown.subscribe())),
            ];
            info!("Relayer started, press Ctrl-C to stop");

            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for shutdown signal")?;
            info!("Shutdown signal received, stopping");
            shutdown.shutdown();

            for task in tasks {
                if let Err(e) = task.await {
                    error!("Sender task failed: {}", e);
                }
            }
            for task in relayers {
                match task.await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => error!("Relayer exited with error: {}", e),
                    Err(e) => error!("Relayer task failed: {}", e),
                }
            }
            info!("Relayer stopped");
            Ok(())
        }
    }
}
