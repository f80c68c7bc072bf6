use crate::members::Member;
use crate::members::MemberRegistry;
use crate::message::MessageTemplate;
use async_trait::async_trait;
use coalescer::EmitSink;
use serde::Serialize;
use std::sync::Arc;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

pub type SharedOutput<W> = Arc<Mutex<W>>;

/// What is written, as a JSON line, for each welcomed batch.
#[derive(Debug, Serialize)]
pub struct WelcomeMessage<'a> {
    pub group: &'a str,
    pub users: Vec<&'a str>,
    pub message: String,
}

/// Renders each batch of new members as a welcome message.
///
/// Batches left empty by the eligibility check are not written.
pub struct WelcomeSink<W> {
    template: MessageTemplate,
    registry: MemberRegistry,
    output: SharedOutput<W>,
}

impl<W> WelcomeSink<W> {
    pub fn new(template: MessageTemplate, registry: MemberRegistry, output: SharedOutput<W>) -> Self {
        WelcomeSink {
            template,
            registry,
            output,
        }
    }
}

#[async_trait]
impl<W> EmitSink<String, Member> for WelcomeSink<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn deliver(&self, group: &String, members: Vec<Member>) -> anyhow::Result<()> {
        if members.is_empty() {
            debug!(%group, "No member left to welcome");
            return Ok(());
        }

        let group_name = self.registry.group_name(group).await;
        let welcome = WelcomeMessage {
            group,
            users: members.iter().map(|member| member.user.as_str()).collect(),
            message: self.template.render(&group_name, &members),
        };

        let mut line = serde_json::to_vec(&welcome)?;
        line.push(b'\n');

        let mut output = self.output.lock().await;
        output.write_all(&line).await?;
        output.flush().await?;
        Ok(())
    }
}
