use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use lending_core::{
    bridge::{LocalBridge, SharedReceiver},
    custody::{MockToken, TokenCustody},
    ledger::RepayOutcome,
    oracle::{PriceOracle, RpcPriceFeed, StaticPriceFeed},
    relayer::Relayer,
    Address, Config, LedgerStateMachine, OriginRelay,
};
use std::path::PathBuf;
use std::sync::Arc;
use tabled::{Table, Tabled};
use tokio::sync::Mutex;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use unicode_width::UnicodeWidthStr;

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
    /// 在本地桥上模拟 存款 -> 借款 -> 还款 的完整流程
    Simulate {
        /// 配置文件路径
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,
        /// 存款数量（最小单位）
        #[arg(short, long, default_value_t = 100)]
        amount: u128,
        /// 预言机报价（整数形式）
        #[arg(long, default_value_t = 135_139_880)]
        answer: i128,
        /// 报价精度
        #[arg(long, default_value_t = 8)]
        decimals: u8,
        /// 使用 JSON-RPC 价格源代替本地报价
        #[arg(long, value_name = "URL")]
        price_rpc: Option<String>,
    },
}

#[derive(Tabled)]
struct PositionRow {
    depositor: String,
    collateral: String,
    deposited: u128,
    borrowed: u128,
    borrow_token_balance: u128,
    collateral_balance: u128,
}

fn heading(title: &str) {
    println!("\n{}", title);
    println!("{}", "=".repeat(UnicodeWidthStr::width(title)));
}

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::ValidateConfig { config } => {
            info!("正在验证配置文件: {:?}", config);
            let config = Config::load(config)?;
            println!("配置文件验证成功!");
            println!("配置内容概要:");
            println!("- 账本: {} (链 {})", config.ledger.address, config.ledger.chain_selector);
            println!("  - 借款代币: {}", config.ledger.borrow_token);
            println!("  - 手续费代币: {}", config.ledger.fee_token);
            println!("  - 抵押率: {} bps", config.ledger.ltv_bps);
            match config.ledger.max_price_age_secs {
                Some(age) => println!("  - 报价最大时效: {}秒", age),
                None => println!("  - 报价最大时效: 不限"),
            }
            println!("  - 价格源:");
            for feed in &config.ledger.price_feeds {
                println!("    - {}", feed);
            }
            println!("- 源链发送端: {} (链 {})", config.origin.address, config.origin.chain_selector);
            println!("- 白名单发送方:");
            for sender in &config.allowed_senders {
                println!("  - {} (链 {})", sender.sender, sender.chain_selector);
            }
            println!("- 桥手续费: {}", config.bridge.fee);
            println!("- 中继器配置:");
            println!("  - 轮询间隔: {}秒", config.relayer.poll_interval);
            println!("  - 最大重试次数: {}", config.relayer.max_retries);
            println!("  - 重试延迟: {}秒", config.relayer.retry_delay);
            Ok(())
        }
        Commands::Simulate {
            config,
            amount,
            answer,
            decimals,
            price_rpc,
        } => {
            info!("使用配置文件: {:?}", config);
            let config = Config::load(config)?;
            simulate(config, amount, answer, decimals, price_rpc).await
        }
    }
}

async fn simulate(config: Config, amount: u128, answer: i128, decimals: u8, price_rpc: Option<String>) -> Result<()> {
    const FEE_FUNDS: u128 = 50_000_000_000_000_000_000;

    let depositor = Address::from_label("depositor");
    let collateral_token = Address::from_label("ccip-bnm");
    let feed_ref = config.ledger.price_feeds[0];

    heading("1: 部署代币与桥");
    let source_link = MockToken::new(config.origin.fee_token, "LINK", None).shared();
    let dest_link = MockToken::new(config.ledger.fee_token, "LINK", None).shared();
    let bnm = MockToken::new(collateral_token, "CCIP-BnM", None).shared();
    let usdc = MockToken::new(config.ledger.borrow_token, "mUSDC", Some(config.ledger.address)).shared();

    source_link.write().await.drip(config.origin.address, FEE_FUNDS)?;
    dest_link.write().await.drip(config.ledger.address, FEE_FUNDS)?;
    {
        let mut token = bnm.write().await;
        token.drip(depositor, amount)?;
        token.approve(depositor, config.origin.address, amount);
    }

    let fee = config.bridge.fee as u128;
    let source_bridge = Arc::new(LocalBridge::new(config.origin.router, fee, source_link.clone()));
    let dest_bridge = Arc::new(LocalBridge::new(config.ledger.router, fee, dest_link.clone()));
    println!("源链路由: {}", source_bridge.router());
    println!("目标链路由: {}", dest_bridge.router());

    heading("2: 部署账本与源链发送端");
    let mut ledger = LedgerStateMachine::new(&config, dest_bridge.clone(), usdc.clone()).await?;
    let oracle: Arc<dyn PriceOracle> = match price_rpc {
        Some(url) => Arc::new(RpcPriceFeed::new(&url, feed_ref)),
        None => Arc::new(StaticPriceFeed::new("BnM / USD", decimals, answer)?),
    };
    ledger.register_price_feed(feed_ref, oracle)?;
    let ledger = Arc::new(Mutex::new(ledger));

    let mut origin = OriginRelay::new(&config, source_bridge.clone());
    origin.support_token(bnm.clone()).await?;
    let origin = Arc::new(Mutex::new(origin));
    println!("账本: {}", config.ledger.address);
    println!("发送端: {}", config.origin.address);

    let mut relayer = Relayer::new(config.relayer.clone());
    relayer.add_bridge(source_bridge.clone());
    relayer.add_bridge(dest_bridge.clone());
    let ledger_receiver: SharedReceiver = ledger.clone();
    let origin_receiver: SharedReceiver = origin.clone();
    relayer.register_receiver(config.ledger.chain_selector, config.ledger.address, ledger_receiver);
    relayer.register_receiver(config.origin.chain_selector, config.origin.address, origin_receiver);

    heading("3: 从源链发送存款消息");
    let deposit_id = origin
        .lock()
        .await
        .send_message(
            depositor,
            config.ledger.chain_selector,
            config.ledger.address,
            collateral_token,
            amount,
            None,
        )
        .await?;
    println!("消息已发送: {}", deposit_id);

    heading("4: 中继并检查目标链收到的消息");
    let report = relayer.relay_pending().await;
    if report.delivered != 1 {
        bail!("Deposit message was not delivered: {:?}", report);
    }
    {
        let ledger = ledger.lock().await;
        let (message_id, detail) = ledger
            .last_received_message()
            .context("Ledger has not received any message")?;
        println!("messageId: {}", message_id);
        println!("sourceChainSelector: {}", detail.source_chain_selector);
        println!("sender: {}", detail.sender);
        println!("depositor: {}", detail.depositor);
        println!("token: {}", detail.token);
        println!("amount: {}", detail.amount);
    }

    heading("5: 以存款为抵押借款");
    let borrowed = ledger.lock().await.borrow(&deposit_id, &feed_ref).await?;
    println!("借出: {}", borrowed);

    heading("6: 还款并发送回执");
    let outstanding = ledger
        .lock()
        .await
        .borrowings(&depositor, &config.ledger.borrow_token);
    let balance = usdc.read().await.balance_of(&depositor);
    if outstanding != balance {
        bail!(
            "Borrower's balance '{}' does not match the amount borrowed '{}'",
            balance,
            outstanding
        );
    }
    usdc.write().await.approve(depositor, config.ledger.address, balance);

    let outcome = ledger
        .lock()
        .await
        .repay_and_send_message(
            depositor,
            balance,
            config.origin.chain_selector,
            config.origin.address,
            &deposit_id,
        )
        .await?;
    match outcome {
        RepayOutcome::Sent { message_id, fees } => println!("回执消息: {} (手续费 {})", message_id, fees),
        RepayOutcome::NothingOutstanding => warn!("没有未偿借款，无需还款"),
    }

    let report = relayer.relay_pending().await;
    info!("回执投递结果: {:?}", report);

    heading("7: 最终头寸");
    let ledger = ledger.lock().await;
    let row = PositionRow {
        depositor: depositor.to_string(),
        collateral: bnm.read().await.symbol().to_string(),
        deposited: ledger.deposits(&depositor, &collateral_token),
        borrowed: ledger.borrowings(&depositor, &config.ledger.borrow_token),
        borrow_token_balance: usdc.read().await.balance_of(&depositor),
        collateral_balance: bnm.read().await.balance_of(&depositor),
    };
    println!("{}", Table::new(vec![row]));
    println!("mUSDC 总供应量: {}", usdc.read().await.total_supply());

    Ok(())
}
