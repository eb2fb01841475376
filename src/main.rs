use clap::Parser;
use log::{error, info};
use std::process::exit;
use zshield::cli::{render_status, Cli, Command};
use zshield::config::Config;
use zshield::logger::init_logging;
use zshield::scheduler::ProtectionScheduler;

#[tokio::main]
async fn main() {
    // Analyser les arguments de ligne de commande
    let cli = Cli::parse();

    // Charger la configuration pour déterminer le mode de log
    let config = match Config::load_from(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Erreur de configuration: {:#}", e);
            exit(1);
        }
    };
    init_logging(&config);

    if let Err(e) = execute(cli.command, &config).await {
        error!("{:#}", e);
        exit(1);
    }
}

async fn execute(command: Command, config: &Config) -> anyhow::Result<()> {
    let scheduler = ProtectionScheduler::from_config(config)?;
    scheduler.load().await?;

    match command {
        Command::Run => {
            info!("zshield {} démarré", config.version);
            scheduler.run_until(shutdown_signal()).await;
            info!("zshield arrêté");
        }
        Command::Status { json } => {
            let infos = scheduler.list_service_status().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&infos)?);
            } else {
                print!("{}", render_status(&infos));
            }
        }
        Command::Add(args) => {
            let id = scheduler.add_service(args.into_settings()).await?;
            let info = scheduler.service_info(id).await?;
            match info.error {
                Some(reason) => println!("Service {} enregistré mais arrêté: {}", id, reason),
                None => println!("Service {} enregistré", id),
            }
            println!("Redémarrez zshield pour appliquer les modifications");
        }
        Command::Remove { id } => {
            scheduler.remove_service(id).await?;
            println!("Service {} supprimé", id);
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Impossible d'écouter Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
