//! clusterplugctl - Clusterplug control utility

use anyhow::Result;
use clap::{Parser, Subcommand};
use clusterplug::ipc::IpcClient;
use clusterplug::params::{Parameter, ParameterValue};
use clusterplug::policy::DisplayEvent;

/// Clusterplug control utility
#[derive(Parser)]
#[command(name = "clusterplugctl", version, about = "Control the Clusterplug hotplug daemon")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Socket path
    #[arg(long, default_value = "/run/clusterplug/clusterplug.sock")]
    socket: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Show controller status
    Status,

    /// Read a parameter
    Get {
        /// Parameter name (e.g. load_threshold_up)
        name: Parameter,
    },

    /// Write a parameter
    Set {
        /// Parameter name
        name: Parameter,

        /// New value (integers, or 1/0, on/off for switches)
        value: String,
    },

    /// List all parameters
    Params,

    /// Inject a display event (on-begin, on-complete, off-begin, off-complete)
    Display { event: DisplayEvent },

    /// Start the controller
    Enable,

    /// Stop the controller and bring every core online
    Disable,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = IpcClient::new(&cli.socket);

    match cli.command {
        Commands::Status => {
            let status = client.get_status().await?;
            let ctl = &status.controller;

            println!("Clusterplug Status");
            println!("==================");
            println!("Version:       {}", status.version);
            println!("Started:       {}", status.started_at.format("%Y-%m-%d %H:%M:%S"));
            println!("Mode:          {}", ctl.mode);
            println!(
                "Topology:      {} big, {} LITTLE ({:?})",
                ctl.topology.num_big(),
                ctl.topology.num_little(),
                ctl.topology.layout()
            );
            let online: Vec<String> = ctl.online_cores.iter().map(|c| c.to_string()).collect();
            println!("Online:        [{}]", online.join(", "));
            println!(
                "Clusters:      big {}, LITTLE {}",
                on_off(ctl.cluster.big_enabled),
                on_off(ctl.cluster.little_enabled)
            );
            println!("Screen:        {}", on_off(ctl.cluster.screen_on));
            println!("Votes:         up {}, down {}", ctl.votes.up, ctl.votes.down);
            println!();

            println!("Statistics:");
            println!("  Ticks:       {}", ctl.stats.ticks);
            println!("  Decisions:   {}", ctl.stats.decisions);
            println!("  Onlined:     {}", ctl.stats.cores_onlined);
            println!("  Offlined:    {}", ctl.stats.cores_offlined);
            println!("  Failures:    {}", ctl.stats.switch_failures);
            if let Some(load) = &ctl.stats.last_load {
                println!(
                    "  Last load:   {}% over {} cores (big {}, LITTLE {})",
                    load.average, load.online, load.big_sum, load.little_sum
                );
            }
            if let (Some(action), Some(at)) = (ctl.stats.last_action, ctl.stats.last_action_at) {
                println!("  Last action: {:?} at {}", action, at.format("%H:%M:%S"));
            }
        }

        Commands::Get { name } => {
            let value = client.get_parameter(name).await?;
            println!("{}", value);
        }

        Commands::Set { name, value } => {
            let value = name.parse_value(&value)?;
            client.set_parameter(name, value).await?;
            println!("{} set to {}", name, value);
        }

        Commands::Params => {
            println!("Parameters");
            println!("==========");
            for entry in client.list_parameters().await? {
                println!("  {:<28}{}", entry.name.name(), entry.value);
            }
        }

        Commands::Display { event } => {
            client.display_event(event).await?;
            println!("Sent {:?}", event);
        }

        Commands::Enable => {
            client
                .set_parameter(Parameter::Enabled, ParameterValue::Bool(true))
                .await?;
            println!("Controller enabled");
        }

        Commands::Disable => {
            client
                .set_parameter(Parameter::Enabled, ParameterValue::Bool(false))
                .await?;
            println!("Controller disabled, all cores online");
        }
    }

    Ok(())
}

fn on_off(value: bool) -> &'static str {
    if value {
        "on"
    } else {
        "off"
    }
}
