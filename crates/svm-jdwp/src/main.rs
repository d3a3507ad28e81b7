use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use svm_config::DebugServerConfig;
use svm_jdwp::types::TYPE_TAG_CLASS;
use svm_jdwp::vm::Frame;
use svm_jdwp::{
    Checkpoint, DebugContext, ExitRequest, JdwpError, JdwpServer, Location, VmControl, VmState,
    VmThreads,
};

/// Pause between idle checkpoints while the VM runs free.
const CHECKPOINT_INTERVAL: Duration = Duration::from_millis(10);

/// JDWP debug server for the Sedona VM debug mode.
///
/// Waits for a single debugger to attach, then serves it until it disconnects,
/// disposes the VM, or exits it.
#[derive(Debug, Parser)]
#[command(name = "svm-jdwp", version, about)]
struct Cli {
    /// Path to a TOML config file.
    ///
    /// If unset, `SVM_JDWP_CONFIG` is used as a fallback. When neither is
    /// provided the server uses built-in defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen address, overriding `server.bind`.
    #[arg(long)]
    bind: Option<String>,

    /// Listen port, overriding `server.port`.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let (mut config, config_path) =
        DebugServerConfig::resolve(cli.config.as_deref()).context("failed to load config")?;
    if let Some(bind) = cli.bind {
        config.server.bind = bind;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    svm_config::init_tracing(&config.logging);
    install_panic_hook();
    tracing::info!(
        target: "svm.jdwp",
        config = ?config_path,
        addr = %config.server.address(),
        "starting svm-jdwp"
    );

    let vm = Arc::new(VmState::new(VmThreads::from_config(&config.vm)));
    if let Err(err) = serve(config, Arc::clone(&vm)).await {
        tracing::error!(target: "svm.jdwp", error = ?err, "debug server failed");
        return Err(err);
    }

    if let Some(ExitRequest::Exit(code)) = vm.exit_requested() {
        tracing::info!(target: "svm.jdwp", code, "exiting on debugger request");
        std::process::exit(code);
    }
    Ok(())
}

async fn serve(config: DebugServerConfig, vm: Arc<VmState>) -> anyhow::Result<()> {
    let addr = config.server.address();
    let server = JdwpServer::bind(addr.as_str(), config)
        .await
        .with_context(|| format!("failed to listen on {addr}"))?;
    let session = server
        .accept(vm.clone())
        .await
        .context("failed to attach debugger")?;

    let ctx = session.context();
    let exec = std::thread::Builder::new()
        .name("svm-exec".to_owned())
        .spawn({
            let vm = Arc::clone(&vm);
            move || execute(&ctx, &vm)
        })
        .context("failed to spawn execution thread")?;

    let result = session.run().await;

    // Release the execution thread if the debugger left it suspended.
    vm.dispose();
    if let Err(err) = tokio::task::spawn_blocking(move || exec.join()).await {
        tracing::warn!(target: "svm.jdwp", error = %err, "execution thread join failed");
    }

    match result {
        Ok(()) => Ok(()),
        Err(JdwpError::Disconnected) => {
            tracing::info!(target: "svm.jdwp", "debugger disconnected");
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

/// The VM execution loop: report a checkpoint, deliver pending events, then
/// park while the debugger holds the VM suspended.
fn execute(ctx: &DebugContext, vm: &VmState) {
    if let Some(main) = ctx.classes.main_class() {
        let entry = main
            .methods
            .iter()
            .find(|m| m.name == "main")
            .or_else(|| main.methods.first());
        if let Some(method) = entry {
            vm.set_frames(vec![Frame {
                frame_id: 1,
                location: Location {
                    type_tag: TYPE_TAG_CLASS,
                    class_id: main.id,
                    method_id: method.id,
                    index: method.line_table.start,
                },
            }]);
        }
    }

    loop {
        if let Some(request) = vm.exit_requested() {
            tracing::debug!(target: "svm.jdwp", ?request, "execution loop stopping");
            return;
        }

        let checkpoint = Checkpoint {
            opcode: 0,
            location: vm.current_location().unwrap_or_default(),
        };
        ctx.events.check_for_events(&checkpoint);
        if let Err(err) = ctx.events.dispatch_all() {
            tracing::error!(target: "svm.jdwp", error = %err, "event delivery failed; stopping execution loop");
            ctx.shutdown.cancel();
            return;
        }

        if let Some(request) = vm.wait_while_suspended() {
            tracing::debug!(target: "svm.jdwp", ?request, "execution loop stopping");
            return;
        }
        std::thread::sleep(CHECKPOINT_INTERVAL);
    }
}

fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        let message = info
            .payload()
            .downcast_ref::<&str>()
            .map(|s| (*s).to_owned())
            .or_else(|| info.payload().downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "<non-string panic payload>".to_owned());
        let location = info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_default();
        tracing::error!(target: "svm.jdwp", panic = %message, location = %location, "fatal panic");
        eprintln!("svm-jdwp: fatal: {message} at {location}");
        std::process::exit(1);
    }));
}
