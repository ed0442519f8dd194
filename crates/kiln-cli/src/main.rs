//! Console collaborator for the supervisor: relaunches the last-used
//! profile, mirrors the combined server log to the terminal, and maps
//! `:verb` lines to supervisor operations. Everything else typed goes to
//! the server console.

use std::path::{Path, PathBuf};

use anyhow::Context;
use kiln_supervisor::{
    LaunchSpec, MemoryBounds, PROFILE_FILE, Profile, ShutdownPolicy, Supervisor, SupervisorError,
    profile, resolve_launch_spec,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let server_dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("server"));
    tokio::fs::create_dir_all(&server_dir)
        .await
        .with_context(|| format!("create server dir {}", server_dir.display()))?;

    let supervisor = Supervisor::new();
    let mut log_rx = supervisor.subscribe().await;
    tokio::spawn(async move {
        while let Some(line) = log_rx.recv().await {
            println!("{line}");
        }
    });

    let policy = ShutdownPolicy::default();

    println!("kiln: server dir {}", server_dir.display());
    println!("kiln: :start :stop :restart :status :quit; anything else goes to the console");

    if let Err(err) = launch(&supervisor, &server_dir).await {
        eprintln!("kiln: launch failed: {err:#}");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                shutdown(&supervisor, &policy).await;
                break;
            }
            line = lines.next_line() => {
                let Some(input) = line.context("read stdin")? else {
                    // stdin closed: same exit path as :quit.
                    shutdown(&supervisor, &policy).await;
                    break;
                };
                let input = input.trim();
                match input {
                    "" => {}
                    ":quit" => {
                        shutdown(&supervisor, &policy).await;
                        break;
                    }
                    ":stop" => match supervisor.stop(&policy).await {
                        Ok(status) => println!("kiln: stopped ({:?})", status.state),
                        Err(SupervisorError::NoActiveProcess) => {
                            println!("kiln: nothing to stop");
                        }
                        Err(err) => eprintln!("kiln: stop failed: {err}"),
                    },
                    ":start" => {
                        if let Err(err) = launch(&supervisor, &server_dir).await {
                            eprintln!("kiln: launch failed: {err:#}");
                        }
                    }
                    ":restart" => match launch_spec(&server_dir).await {
                        Ok((_, spec)) => {
                            if let Err(err) = supervisor.restart(spec, &policy).await {
                                eprintln!("kiln: restart failed: {err}");
                            }
                        }
                        Err(err) => eprintln!("kiln: restart failed: {err:#}"),
                    },
                    ":status" => {
                        let status = supervisor.status().await;
                        println!(
                            "kiln: state={:?} pid={:?} exit_code={:?} message={:?}",
                            status.state, status.pid, status.exit_code, status.message
                        );
                    }
                    _ => match supervisor.send_command(input).await {
                        Ok(()) => {}
                        Err(SupervisorError::NotInteractive) => {
                            eprintln!("kiln: this server does not accept console input");
                        }
                        Err(SupervisorError::NotRunning) => {
                            eprintln!("kiln: no server is running (:start to launch)");
                        }
                        Err(err) => eprintln!("kiln: console write failed: {err}"),
                    },
                }
            }
        }
    }

    Ok(())
}

/// Resolves a launch from the stored profile, re-reading it each time so
/// edits to profile.json take effect on the next :start or :restart.
async fn launch_spec(server_dir: &Path) -> anyhow::Result<(Profile, LaunchSpec)> {
    let prof = profile::load(&server_dir.join(PROFILE_FILE)).await?;
    let spec = resolve_launch_spec(
        server_dir,
        prof.server_type.as_str(),
        &prof.custom_path,
        MemoryBounds::new(prof.xms, prof.xmx),
    )?;
    Ok((prof, spec))
}

async fn launch(supervisor: &Supervisor, server_dir: &Path) -> anyhow::Result<()> {
    let (prof, spec) = launch_spec(server_dir).await?;
    tracing::debug!(server_type = %prof.server_type, "launching from profile");
    supervisor.start(spec).await?;
    // Persist only configurations that actually launched; a first run
    // materializes profile.json with the defaults.
    profile::save(&server_dir.join(PROFILE_FILE), &prof).await?;
    Ok(())
}

async fn shutdown(supervisor: &Supervisor, policy: &ShutdownPolicy) {
    match supervisor.stop(policy).await {
        Ok(_) | Err(SupervisorError::NoActiveProcess) => {}
        Err(err) => eprintln!("kiln: shutdown stop failed: {err}"),
    }
}
