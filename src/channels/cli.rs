//! CLI channel — stdin/stdout REPL for local testing.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::ChannelError;
use crate::orchestrator::Orchestrator;

const QUIT: &str = "quit";

/// Run one conversation on stdin/stdout until `quit` or EOF.
pub async fn run_repl(orchestrator: &Orchestrator, conversation_id: &str) -> Result<(), ChannelError> {
    let stdin = BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();
    run_session(orchestrator, conversation_id, stdin, stdout).await
}

/// REPL over arbitrary streams. Replies go to `output`, the prompt to stderr.
pub async fn run_session<R, W>(
    orchestrator: &Orchestrator,
    conversation_id: &str,
    input: R,
    mut output: W,
) -> Result<(), ChannelError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let io = |e: std::io::Error| ChannelError::SendFailed {
        name: "cli".into(),
        reason: e.to_string(),
    };
    let mut session = orchestrator.new_session(conversation_id, Some("local-user"));

    output
        .write_all(format!("{}\n", orchestrator.config().greeting).as_bytes())
        .await
        .map_err(io)?;
    output.flush().await.map_err(io)?;

    let mut lines = input.lines();
    loop {
        eprint!("> ");
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break, // EOF
            Err(e) => {
                tracing::error!("Error reading stdin: {}", e);
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.eq_ignore_ascii_case(QUIT) {
            break;
        }

        let outcome = orchestrator.handle_turn_detailed(&mut session, line).await;
        output
            .write_all(format!("\n{}\n\n", outcome.reply).as_bytes())
            .await
            .map_err(io)?;
        output.flush().await.map_err(io)?;

        if let Some(task) = outcome.lead_task {
            match task.await {
                Ok(Some(lead)) => eprintln!("Lead: {}", lead.summary()),
                Ok(None) => eprintln!("Lead extraction failed, see log"),
                Err(e) => tracing::warn!(error = %e, "Lead extraction task panicked"),
            }
        }
    }
    Ok(())
}
