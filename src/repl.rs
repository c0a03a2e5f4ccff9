//! Interactive loop for `flipflops chat`.
//!
//! Reads one command per line from stdin. The prompt is printed only when
//! stdin is a terminal, so piped input produces clean output. A failed
//! command prints its error and the loop continues.

use std::io::Write;

use anyhow::Result;
use flipflops_core::FlipflopsError;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::router::Router;

const PROMPT: &str = "flipflops> ";

pub async fn run(router: &Router, session_id: &str) -> Result<()> {
    let interactive = atty::is(atty::Stream::Stdin);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    if interactive {
        println!("FLIPFLOPS, sessão {}. Digite `ajuda` para ver os comandos.", session_id);
    }

    loop {
        if interactive {
            print!("{}", PROMPT);
            std::io::stdout().flush()?;
        }
        let Some(line) = lines.next_line().await? else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        match router.handle(session_id, &line).await {
            Ok(reply) => {
                println!("{}\n", reply.render());
                if reply.is_exit() {
                    break;
                }
            }
            Err(e) => {
                println!("Erro: {:#}", e);
                if e
                    .downcast_ref::<FlipflopsError>()
                    .is_some_and(FlipflopsError::is_retryable)
                {
                    println!("O modelo de linguagem não respondeu; tente novamente em instantes.");
                }
                println!();
            }
        }
    }
    Ok(())
}
