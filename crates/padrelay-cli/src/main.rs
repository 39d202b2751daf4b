//! `padrelay` – controller to pub/sub to grid display relay.
//!
//! This binary wires the pipelines onto an in-process bus:
//!
//! 1. Resolves the configuration (`~/.padrelay/config.toml`, `PADRELAY_*`
//!    variables, command-line options).  A bad configuration is fatal.
//! 2. **Producer**: reads `control x value` lines from stdin, debounces them
//!    per key and publishes the settled values to the input topic.
//! 3. **Consumer**: pulls display grids from the output topic and paints
//!    them on a terminal grid.  `hit x y` lines stand in for presses on that
//!    grid and go to the input topic as they arrive.
//! 4. In `both` mode a level-meter bridge turns input-topic traffic into
//!    grids on the output topic, so one process exercises the whole loop.
//! 5. **Ctrl-C** stops the pipelines and clears the display.

mod config;
mod demo;

use std::sync::Arc;

use colored::Colorize;
use padrelay_hal::{ConsoleDisplay, stdin_input};
use padrelay_middleware::{InMemoryBus, MessageBus, Publisher};
use padrelay_runtime::{
    ConsumerPipeline, DebounceRegistry, HitForwarder, ProducerPipeline, StateApplier, init_tracing,
    resolve_subscription,
};
use padrelay_types::RelayError;
use tracing::{error, info, warn};

use crate::config::{CliArgs, Config};
use crate::demo::{METER_HEIGHT, METER_WIDTH, MeterBridge};

const METER_SUBSCRIPTION: &str = "padrelay-meter";

#[tokio::main]
async fn main() {
    // RUST_LOG picks the level (default "info"); PADRELAY_LOG_FORMAT=json
    // switches to newline-delimited JSON.  Keep the guard alive so spans are
    // flushed on exit.
    let telemetry = init_tracing("padrelay");

    let args = match CliArgs::parse(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{}: {e}\n\n{}", "error".red().bold(), config::USAGE);
            std::process::exit(2);
        }
    };
    if args.help {
        println!("{}", config::USAGE);
        return;
    }

    let cfg = match config::resolve(&args) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            std::process::exit(1);
        }
    };

    if args.save {
        let path = args.config.clone().unwrap_or_else(config::config_path);
        match config::save_to(&cfg, &path) {
            Ok(()) => println!("  {} Config saved to {}", "✓".green().bold(), path.display().to_string().bold()),
            Err(e) => warn!(error = %e, "could not save config"),
        }
    }

    print_banner(&cfg);

    let code = match run(cfg).await {
        Ok(()) => 0,
        Err(e) => {
            error!(error = %e, "startup failed");
            1
        }
    };
    drop(telemetry);
    // The stdin reader sits on a blocking thread that would hold the runtime
    // open until the next newline.
    std::process::exit(code);
}

async fn run(cfg: Config) -> Result<(), RelayError> {
    let bus = Arc::new(InMemoryBus::new());
    bus.create_topic(&cfg.input_topic);
    bus.create_topic(&cfg.output_topic);
    info!(
        project = %cfg.project,
        input_topic = %cfg.input_topic,
        output_topic = %cfg.output_topic,
        mode = %cfg.mode,
        "in-process bus ready"
    );

    let (controller, pad) = stdin_input();

    let mut producer = cfg.mode.runs_producer().then(|| {
        let sink = Arc::new(Publisher::new(bus.clone(), &cfg.input_topic));
        let registry = Arc::new(DebounceRegistry::new(sink, cfg.quiet_period()));
        ProducerPipeline::new(Box::new(controller), registry)
    });

    let mut consumer = if cfg.mode.runs_consumer() {
        // Nothing outlives the process on the in-process bus, so a
        // configured subscription has to be created here.
        if let Some(name) = cfg.subscription.as_deref()
            && !bus.has_subscription(name)
        {
            bus.create_subscription(name, &cfg.output_topic, cfg.ack_deadline())
                .await?;
        }
        let subscription = resolve_subscription(
            &*bus,
            cfg.subscription.as_deref(),
            &cfg.output_topic,
            cfg.ack_deadline(),
        )
        .await?;
        let applier = StateApplier::new(Box::new(ConsoleDisplay::new(METER_WIDTH, METER_HEIGHT)));
        Some(ConsumerPipeline::new(bus.clone(), subscription, applier).with_pull_backoff(cfg.pull_backoff()))
    } else {
        None
    };
    // Presses on the grid belong with the display that shows it.
    let mut forwarder = consumer
        .is_some()
        .then(|| HitForwarder::new(Box::new(pad), Publisher::new(bus.clone(), &cfg.input_topic)));

    let mut bridge = match cfg.mode {
        config::Mode::Both => {
            bus.create_subscription(METER_SUBSCRIPTION, &cfg.input_topic, cfg.ack_deadline())
                .await?;
            Some(MeterBridge::new(
                bus.clone(),
                METER_SUBSCRIPTION,
                Publisher::new(bus.clone(), &cfg.output_topic),
                cfg.pull_backoff(),
            ))
        }
        _ => None,
    };

    println!(
        "  Type {} or {} lines, {} to quit.\n",
        "control x value".bold().cyan(),
        "hit x y".bold().cyan(),
        "Ctrl-C".bold()
    );

    {
        let producer_task = async {
            if let Some(producer) = producer.as_mut() {
                producer.run().await;
            }
            std::future::pending::<()>().await
        };
        let consumer_task = async {
            if let Some(consumer) = consumer.as_mut() {
                consumer.run().await;
            }
            std::future::pending::<()>().await
        };
        let forwarder_task = async {
            if let Some(forwarder) = forwarder.as_mut() {
                forwarder.run().await;
            }
            std::future::pending::<()>().await
        };
        let bridge_task = async {
            if let Some(bridge) = bridge.as_mut() {
                bridge.run().await;
            }
            std::future::pending::<()>().await
        };
        let shutdown = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "cannot listen for Ctrl-C");
                std::future::pending::<()>().await
            }
        };

        tokio::select! {
            _ = producer_task => {}
            _ = consumer_task => {}
            _ = forwarder_task => {}
            _ = bridge_task => {}
            _ = shutdown => {
                println!();
                println!("{}", "⚠  Ctrl-C received – shutting down …".yellow().bold());
            }
        }
    }

    if let Some(consumer) = consumer.as_mut() {
        match consumer.applier_mut().reset() {
            Ok(()) => println!("{}", "  ✓ Display cleared.".green()),
            Err(e) => warn!(error = %e, "display reset failed"),
        }
    }
    bus.close();
    println!("{}", "  ✓ Exiting padrelay.".green());
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner(cfg: &Config) {
    println!();
    println!("{}", r#"   ___          _ ___      _           "#.bold().cyan());
    println!("{}", r#"  / _ \___ ____| | _ \___ | |__ _ _  _ "#.bold().cyan());
    println!("{}", r#" |  _/ _` / _` |   / -_)| / _` | || |"#.bold().cyan());
    println!("{}", r#" |_| \__,_\__,_|_|_\___||_\__,_|\_, |"#.bold().cyan());
    println!("{}", r#"                                |__/ "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "padrelay".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!(
        "  mode {}  ·  {} → {}",
        cfg.mode.to_string().bold(),
        cfg.input_topic.dimmed(),
        cfg.output_topic.dimmed()
    );
    println!();
}
