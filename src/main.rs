use anyhow::{Context, Result};
use global_hotkey::GlobalHotKeyEvent;
use tokio::sync::mpsc;

use rephrase_hotkey::capture::CaptureSettings;
use rephrase_hotkey::config::Config;
use rephrase_hotkey::dispatch::HotkeyDispatcher;
use rephrase_hotkey::input::{HotkeyRegistry, SystemClipboard, SystemInjector};
use rephrase_hotkey::pipeline::RephrasePipeline;
use rephrase_hotkey::rephrase::{FallbackLadders, HttpGenerator, RephraseInvoker};
use rephrase_hotkey::store::{FileProfileSource, ProfileStore};
use rephrase_hotkey::{ipc, permissions, telemetry};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load()?;
    println!("✓ Config loaded from ~/.rephrase-hotkey.toml");

    telemetry::init(&config.telemetry)?;
    tracing::info!("rephrase-hotkey starting");
    println!("✓ Telemetry initialized");

    if permissions::check_all() {
        println!("✓ Permissions OK");
    } else {
        println!("! Key injection unavailable, clipboard contents will be used as-is");
    }

    let store_path = Config::expand_path(&config.store.path)?;
    let store = ProfileStore::load_or_create(&store_path)
        .with_context(|| format!("failed to load store from {}", store_path.display()))?;
    println!(
        "✓ Store loaded: {} profiles, {} hotkeys",
        store.profiles.len(),
        store.hotkeys.len()
    );

    let mut registry = HotkeyRegistry::system()?;
    let report = registry.set_bindings(store.hotkeys);
    println!("✓ Hotkeys registered: {}", report.registered.join(", "));
    for rejected in &report.rejected {
        println!("✗ Hotkey {} skipped: {}", rejected.combination, rejected.reason);
    }

    let clipboard = SystemClipboard::new().context("failed to open system clipboard")?;
    let generator = HttpGenerator::new(&config.rephrase).context("failed to build HTTP client")?;
    let invoker = RephraseInvoker::new(
        generator,
        FallbackLadders::from_config(&config.rephrase.fallbacks),
        config.rephrase.attempt_timeout(),
    );
    let pipeline = RephrasePipeline::new(
        FileProfileSource::new(store_path),
        clipboard,
        SystemInjector,
        invoker,
        CaptureSettings::from(&config.capture),
    );
    let dispatcher = HotkeyDispatcher::new(pipeline);

    let (sync_tx, mut sync_rx) = mpsc::channel(16);
    if config.ipc.enabled {
        let listener = ipc::bind(&config.ipc.address).await?;
        tokio::spawn(ipc::serve(listener, sync_tx));
        println!("✓ Sync channel listening on {}", config.ipc.address);
    } else {
        drop(sync_tx);
    }

    tracing::info!("event loop starting (press Ctrl+C to exit)");
    println!("\nRephrase Hotkey is running. Select text and press a hotkey.");
    println!("Press Ctrl+C to exit.\n");

    let receiver = GlobalHotKeyEvent::receiver();
    loop {
        // Drain hotkey events
        while let Ok(event) = receiver.try_recv() {
            if let Some(binding) = registry.binding_for_event(&event) {
                tracing::info!(
                    combination = %binding.combination,
                    profile_id = %binding.profile_id,
                    "hotkey fired"
                );
                let _ = dispatcher.fire(binding.clone());
            }
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown signal received");
                println!("\nShutting down...");
                break;
            }
            Some(request) = sync_rx.recv() => {
                ipc::apply(&mut registry, request);
            }
            () = tokio::time::sleep(tokio::time::Duration::from_millis(10)) => {
                // Poll interval (10ms to avoid busy-waiting)
            }
        }
    }

    Ok(())
}
