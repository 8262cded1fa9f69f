//! CLI channel — interactive terminal chat.
//!
//! The simplest adapter: one line of stdin is one inbound message; replies
//! print to stdout. Always allowed (the local user owns the process).

use async_trait::async_trait;
use chrono::Utc;
use picoagent_core::channel::{Channel, Inbound};
use picoagent_core::error::ChannelError;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Mutex;

const SENDER: &str = "local";

/// Interactive terminal channel.
pub struct CliChannel {
    stdin: Mutex<tokio::io::Lines<BufReader<tokio::io::Stdin>>>,
}

impl CliChannel {
    pub fn new() -> Self {
        Self {
            stdin: Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
        }
    }
}

impl Default for CliChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Channel for CliChannel {
    fn name(&self) -> &str {
        "cli"
    }

    /// Await the next non-empty stdin line. EOF and the usual exit words
    /// yield an empty batch, which the caller treats as "stop polling".
    async fn poll(&self) -> Result<Vec<Inbound>, ChannelError> {
        let mut lines = self.stdin.lock().await;
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let text = line.trim().to_string();
                    if text.is_empty() {
                        continue;
                    }
                    if matches!(text.as_str(), "exit" | "quit" | "/exit" | "/quit" | ":q") {
                        return Ok(Vec::new());
                    }
                    return Ok(vec![Inbound {
                        channel: "cli".into(),
                        sender: SENDER.into(),
                        text,
                        ts: Utc::now(),
                    }]);
                }
                Ok(None) => return Ok(Vec::new()),
                Err(e) => return Err(ChannelError::ConnectionLost(e.to_string())),
            }
        }
    }

    async fn send(&self, _sender: &str, text: &str) -> Result<(), ChannelError> {
        println!("{text}");
        Ok(())
    }

    fn is_allowed(&self, _sender: &str) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_properties() {
        let channel = CliChannel::new();
        assert_eq!(channel.name(), "cli");
        assert!(channel.is_allowed("anyone"));
    }

    #[tokio::test]
    async fn send_never_fails() {
        let channel = CliChannel::new();
        assert!(channel.send("local", "hello").await.is_ok());
    }
}
