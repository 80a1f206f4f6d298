use log::{error, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{sleep, Duration};

use crate::{
    bridge::{LocalBridge, ReceiveOutcome, SharedReceiver},
    config::RelayerConfig,
    types::{Address, BridgeMessage, ChainSelector, MessageStatus},
    Error, Result,
};

/// 一轮投递的统计
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RelayReport {
    pub delivered: usize,
    pub duplicates: usize,
    pub failed: usize,
}

/// 从各链的桥出站队列取消息并投递给目标接收方
pub struct Relayer {
    config: RelayerConfig,
    bridges: Vec<Arc<LocalBridge>>,
    receivers: HashMap<(ChainSelector, Address), SharedReceiver>,
}

impl Relayer {
    pub fn new(config: RelayerConfig) -> Self {
        Self {
            config,
            bridges: Vec::new(),
            receivers: HashMap::new(),
        }
    }

    pub fn add_bridge(&mut self, bridge: Arc<LocalBridge>) {
        self.bridges.push(bridge);
    }

    pub fn register_receiver(&mut self, chain_selector: ChainSelector, address: Address, receiver: SharedReceiver) {
        info!("Registered receiver {} on chain {}", address, chain_selector);
        self.receivers.insert((chain_selector, address), receiver);
    }

    /// 投递当前所有待处理消息
    pub async fn relay_pending(&self) -> RelayReport {
        let mut report = RelayReport::default();

        for bridge in &self.bridges {
            for message in bridge.take_pending().await {
                let message_id = message.message_id;
                match self.relay_message(message).await {
                    Ok(ReceiveOutcome::Applied) => {
                        bridge.mark(&message_id, MessageStatus::Processed).await;
                        report.delivered += 1;
                    }
                    Ok(ReceiveOutcome::Duplicate) => {
                        bridge.mark(&message_id, MessageStatus::Processed).await;
                        report.duplicates += 1;
                    }
                    Err(e) => {
                        error!("Failed to relay message {}: {}", message_id, e);
                        bridge.mark(&message_id, MessageStatus::Failed).await;
                        report.failed += 1;
                    }
                }
            }
        }

        report
    }

    async fn relay_message(&self, message: BridgeMessage) -> Result<ReceiveOutcome> {
        let target = (message.destination_chain_selector, message.receiver);
        let receiver = self.receivers.get(&target).ok_or_else(|| {
            Error::BridgeUnavailable(format!(
                "No receiver {} registered on chain {}",
                message.receiver, message.destination_chain_selector
            ))
        })?;

        let mut retry_count = 0;
        let max_retries = self.config.max_retries;
        let base_delay = self.config.retry_delay;

        loop {
            let result = receiver.lock().await.on_message_received(message.clone()).await;
            match result {
                Ok(outcome) => {
                    info!(
                        "Relayed message {} from chain {} to chain {}",
                        message.message_id, message.source_chain_selector, message.destination_chain_selector
                    );
                    return Ok(outcome);
                }
                Err(e) if e.is_retryable() => {
                    retry_count += 1;
                    if retry_count >= max_retries {
                        error!("Max retries ({}) reached for message {}. Last error: {}", max_retries, message.message_id, e);
                        return Err(e);
                    }

                    // 线性增长的重试延迟
                    let delay = base_delay * retry_count as u64;
                    warn!(
                        "Retry {}/{} for message {} after {} seconds. Error: {}",
                        retry_count, max_retries, message.message_id, delay, e
                    );
                    sleep(Duration::from_secs(delay)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// 按配置的轮询间隔持续投递，直到收到关闭信号
    pub async fn start(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!("Starting relayer...");

        loop {
            let report = self.relay_pending().await;
            if report != RelayReport::default() {
                info!(
                    "Relayed {} messages ({} duplicates, {} failed)",
                    report.delivered, report.duplicates, report.failed
                );
            }

            tokio::select! {
                _ = sleep(Duration::from_secs(self.config.poll_interval)) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Relayer stopped");
                        return Ok(());
                    }
                }
            }
        }
    }
}
