// Downstream actuator boundary
//
// The actuator presents the selected question to an answering agent (a browser
// page, a bot, a console). It runs on its own task and talks to the round loop
// through a command channel and a result channel, one command in flight at a
// time.

use crate::error::{PickerError, PickerResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const CHANNEL_CAPACITY: usize = 16;

/// Command sent to the actuator task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActuatorCommand {
    Prepare,
    /// Show how long the next collection window runs
    SetCountdown { seconds: u64 },
    SendQuestion { text: String },
    WaitForAnswer { timeout: Duration },
}

/// Reply from the actuator task, one per command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActuatorReply {
    Ready,
    Accepted,
    /// `completed` is false when the answer did not finish before the timeout
    Answered { completed: bool },
    Failed { message: String },
}

/// Something that can present questions and report when they are answered
#[async_trait]
pub trait Actuator: Send + 'static {
    async fn prepare(&mut self) -> PickerResult<()>;

    async fn set_countdown(&mut self, seconds: u64) -> PickerResult<()>;

    async fn send_question(&mut self, text: &str) -> PickerResult<()>;

    /// Wait until the answer is complete; `true` if it finished normally
    async fn wait_for_answer(&mut self, timeout: Duration) -> PickerResult<bool>;

    fn name(&self) -> &str;
}

/// Actuator that only logs; answers complete immediately
#[derive(Debug, Default)]
pub struct LoggingActuator;

#[async_trait]
impl Actuator for LoggingActuator {
    async fn prepare(&mut self) -> PickerResult<()> {
        info!("Actuator ready");
        Ok(())
    }

    async fn set_countdown(&mut self, seconds: u64) -> PickerResult<()> {
        info!("Next question in {}s", seconds);
        Ok(())
    }

    async fn send_question(&mut self, text: &str) -> PickerResult<()> {
        info!("Question: {}", text);
        Ok(())
    }

    async fn wait_for_answer(&mut self, _timeout: Duration) -> PickerResult<bool> {
        Ok(true)
    }

    fn name(&self) -> &str {
        "logging"
    }
}

/// Round-loop side of the actuator task
pub struct ActuatorHandle {
    commands: mpsc::Sender<ActuatorCommand>,
    replies: mpsc::Receiver<ActuatorReply>,
    task: JoinHandle<()>,
}

/// Run `actuator` on its own task
pub fn spawn_actuator<A: Actuator>(actuator: A) -> ActuatorHandle {
    let (command_tx, command_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (reply_tx, reply_rx) = mpsc::channel(CHANNEL_CAPACITY);

    let task = tokio::spawn(actuator_task(actuator, command_rx, reply_tx));

    ActuatorHandle {
        commands: command_tx,
        replies: reply_rx,
        task,
    }
}

async fn actuator_task<A: Actuator>(
    mut actuator: A,
    mut commands: mpsc::Receiver<ActuatorCommand>,
    replies: mpsc::Sender<ActuatorReply>,
) {
    info!("Actuator task started ({})", actuator.name());

    while let Some(command) = commands.recv().await {
        debug!("Actuator command: {:?}", command);
        let reply = execute(&mut actuator, command).await;
        if replies.send(reply).await.is_err() {
            break;
        }
    }

    info!("Actuator task stopped ({})", actuator.name());
}

async fn execute<A: Actuator>(actuator: &mut A, command: ActuatorCommand) -> ActuatorReply {
    let result = match command {
        ActuatorCommand::Prepare => actuator.prepare().await.map(|_| ActuatorReply::Ready),
        ActuatorCommand::SetCountdown { seconds } => actuator
            .set_countdown(seconds)
            .await
            .map(|_| ActuatorReply::Accepted),
        ActuatorCommand::SendQuestion { text } => actuator
            .send_question(&text)
            .await
            .map(|_| ActuatorReply::Accepted),
        ActuatorCommand::WaitForAnswer { timeout } => {
            match tokio::time::timeout(timeout, actuator.wait_for_answer(timeout)).await {
                Ok(result) => result.map(|completed| ActuatorReply::Answered { completed }),
                Err(_) => {
                    warn!("Answer did not finish within {:?}", timeout);
                    Ok(ActuatorReply::Answered { completed: false })
                }
            }
        }
    };

    result.unwrap_or_else(|e| ActuatorReply::Failed {
        message: e.to_string(),
    })
}

impl ActuatorHandle {
    /// Send one command and wait for its reply
    pub async fn request(&mut self, command: ActuatorCommand) -> PickerResult<ActuatorReply> {
        self.commands
            .send(command)
            .await
            .map_err(|_| PickerError::ActuatorClosed)?;
        self.replies.recv().await.ok_or(PickerError::ActuatorClosed)
    }

    pub async fn prepare(&mut self) -> PickerResult<()> {
        let reply = self.request(ActuatorCommand::Prepare).await?;
        expect_reply(reply, |r| matches!(r, ActuatorReply::Ready))
    }

    pub async fn set_countdown(&mut self, window: Duration) -> PickerResult<()> {
        let seconds = window.as_secs_f64().ceil() as u64;
        let reply = self
            .request(ActuatorCommand::SetCountdown { seconds })
            .await?;
        expect_reply(reply, |r| matches!(r, ActuatorReply::Accepted))
    }

    pub async fn send_question(&mut self, text: &str) -> PickerResult<()> {
        let reply = self
            .request(ActuatorCommand::SendQuestion {
                text: text.to_string(),
            })
            .await?;
        expect_reply(reply, |r| matches!(r, ActuatorReply::Accepted))
    }

    /// `Ok(false)` when the answer timed out
    pub async fn wait_for_answer(&mut self, timeout: Duration) -> PickerResult<bool> {
        match self
            .request(ActuatorCommand::WaitForAnswer { timeout })
            .await?
        {
            ActuatorReply::Answered { completed } => Ok(completed),
            other => Err(unexpected(other)),
        }
    }

    /// Close the command channel and wait for the task to finish
    pub async fn shutdown(self) {
        drop(self.commands);
        let _ = self.task.await;
    }
}

fn expect_reply(reply: ActuatorReply, ok: impl Fn(&ActuatorReply) -> bool) -> PickerResult<()> {
    if ok(&reply) {
        Ok(())
    } else {
        Err(unexpected(reply))
    }
}

fn unexpected(reply: ActuatorReply) -> PickerError {
    match reply {
        ActuatorReply::Failed { message } => PickerError::Actuator(message),
        other => PickerError::Actuator(format!("unexpected reply: {:?}", other)),
    }
}
