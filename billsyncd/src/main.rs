use billsyncd::daemon::{DaemonConfig, DaemonRuntime};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CliMode {
    Run,
    Status,
    SyncNow,
    PurgeDormant,
    Help,
}

fn parse_cli_mode<I>(args: I) -> anyhow::Result<CliMode>
where
    I: IntoIterator<Item = String>,
{
    let mut mode = CliMode::Run;
    for arg in args.into_iter().skip(1) {
        match arg.as_str() {
            "status" => mode = CliMode::Status,
            "sync-now" => mode = CliMode::SyncNow,
            "purge-dormant" => mode = CliMode::PurgeDormant,
            "--help" | "-h" => mode = CliMode::Help,
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(mode)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let mode = parse_cli_mode(std::env::args())?;
    if mode == CliMode::Help {
        println!("Usage: billsyncd [status|sync-now|purge-dormant]");
        println!("  status          Print pending and dormant queue counts");
        println!("  sync-now        Run one drain pass and exit");
        println!("  purge-dormant   Delete items past the retry ceiling");
        return Ok(());
    }

    let config = DaemonConfig::from_env()?;
    let runtime = DaemonRuntime::bootstrap(config).await?;
    match mode {
        CliMode::Run => runtime.run().await,
        CliMode::Status => {
            let status = runtime.engine().status().await?;
            println!("pending: {}", status.pending);
            println!("dormant: {}", status.dormant);
            Ok(())
        }
        CliMode::SyncNow => {
            let summary = runtime.engine().sync_now().await?;
            println!(
                "attempted: {}, applied: {}, failed: {}",
                summary.attempted, summary.applied, summary.failed
            );
            Ok(())
        }
        CliMode::PurgeDormant => {
            let purged = runtime.engine().purge_dormant().await?;
            println!("purged: {purged}");
            Ok(())
        }
        CliMode::Help => Ok(()),
    }
}
