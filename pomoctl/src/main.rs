use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use pomo_ipc::{Connection, IpcError, RuntimeFile, StatusPoll};

#[derive(Parser)]
#[command(name = "pomoctl")]
#[command(about = "Control the running pomo session", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the current phase
    Status,
    /// Skip the rest of the current phase
    EndPhase,
    /// Stop the session
    Abort,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let runtime = RuntimeFile::default_location();
    let Some(info) = runtime
        .load()
        .with_context(|| format!("Failed to read runtime file {:?}", runtime.path()))?
    else {
        println!("No active session");
        return Ok(());
    };

    let mut conn = Connection::connect(info.port).await.map_err(explain)?;
    if !conn.hello(&info.secret).await.map_err(explain)? {
        bail!("Authentication failed");
    }

    match cli.command {
        Commands::Status => match conn.status().await.map_err(explain)? {
            StatusPoll::Running(status) => {
                println!("Phase: {}", status.phase_label);
                println!(
                    "Remaining: {:02}:{:02}",
                    status.remaining_s / 60,
                    status.remaining_s % 60
                );
                println!("Progress: {:.0}%", status.progress * 100.0);
            }
            StatusPoll::Ended => println!("Session finished"),
            StatusPoll::Unusable => bail!("Daemon sent an unreadable status"),
        },
        Commands::EndPhase => {
            conn.end_phase().await.map_err(explain)?;
            println!("OK");
        }
        Commands::Abort => {
            conn.abort().await.map_err(explain)?;
            println!("OK");
        }
    }

    conn.close().await;
    Ok(())
}

fn explain(e: IpcError) -> anyhow::Error {
    match e {
        // The daemon serves one connection at a time.
        IpcError::Timeout => {
            anyhow::anyhow!("Daemon is busy serving a viewer; try again after it detaches")
        }
        other => other.into(),
    }
}
