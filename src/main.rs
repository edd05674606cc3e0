//! Love & Pets Cafe save system entry point
//!
//! On the web this only wires up logging; the UI drives saves through
//! `CafeSaves`. Natively it runs a short save/load walkthrough against
//! in-memory storage.

#[cfg(target_arch = "wasm32")]
use wasm_bindgen::prelude::*;

#[cfg(target_arch = "wasm32")]
#[wasm_bindgen(start)]
pub fn wasm_main() {
    console_error_panic_hook::set_once();
    console_log::init_with_level(log::Level::Info).expect("Failed to init logger");
    log::info!("Love & Pets Cafe save system ready");
}

#[cfg(not(target_arch = "wasm32"))]
fn main() {
    env_logger::init();
    log::info!("Love & Pets Cafe (native) starting...");
    log::info!("Native mode uses in-memory storage - run with `trunk serve` for the web version");

    walkthrough();
}

#[cfg(target_arch = "wasm32")]
fn main() {
    // WASM entry point is wasm_main, this is just to satisfy the compiler
}

#[cfg(not(target_arch = "wasm32"))]
fn walkthrough() {
    use love_pets_cafe::persistence::{AutoSaveOutcome, LifecycleEvent};
    use love_pets_cafe::platform::{Clock, ManualClock, MemoryStorage};
    use love_pets_cafe::state::{Memory, Pet, Rarity};
    use love_pets_cafe::{AutoSaver, CafeState, PersistenceManager, SaveContext, SlotId};

    let clock = ManualClock::new(1_700_000_000_000);
    let mut manager = PersistenceManager::open(MemoryStorage::new(), clock.clone());
    manager.subscribe(|event| println!("  event: {}", event.name()));
    let mut autosaver = AutoSaver::for_manager(&manager);

    let Some(slot) = SlotId::new(1) else {
        return;
    };
    let mut state = CafeState::new_game("Mina");
    state.add_pet(Pet {
        id: "p1".to_string(),
        name: "Biscuit".to_string(),
        species: "corgi".to_string(),
        rarity: Rarity::Rare,
        level: 1,
        assigned_section: Some("espresso_bar".to_string()),
    });

    println!("\nSaving a new game...");
    let context = SaveContext::new(0)
        .with_display_name("Mina's first cafe")
        .with_screen("cafe_floor");
    if !manager.save(&state, slot, &context) {
        println!("✗ Save failed");
        return;
    }

    println!("\nCompleting a shift 2s later (inside the debounce window)...");
    clock.advance(2_000);
    state.record_shift(
        "s1",
        120,
        Some(Memory {
            id: "m1".to_string(),
            title: "Biscuit steals a croissant".to_string(),
            pet_id: Some("p1".to_string()),
            created_at: clock.now_millis(),
            published: false,
        }),
    );
    let outcome = autosaver.on_lifecycle(
        LifecycleEvent::ShiftCompleted,
        &mut manager,
        slot,
        &state,
        &SaveContext::new(2),
    );
    println!("  auto-save: {:?}", outcome);

    println!("\nPublishing the memory 10s later...");
    clock.advance(10_000);
    state.publish_memory("m1");
    let outcome = autosaver.on_lifecycle(
        LifecycleEvent::MemoryPublished,
        &mut manager,
        slot,
        &state,
        &SaveContext::new(12).with_screen("blog_feed"),
    );
    if outcome != AutoSaveOutcome::Saved {
        println!("✗ Auto-save did not run: {:?}", outcome);
    }

    println!("\nSlots:");
    for descriptor in manager.list_all_slots() {
        if descriptor.is_empty() {
            println!("  {} - empty", descriptor.slot_id);
        } else {
            println!(
                "  {} - {} ({}s played, schema {})",
                descriptor.slot_id,
                descriptor.display_name,
                descriptor.metadata.cumulative_play_seconds,
                descriptor.metadata.schema_version
            );
        }
    }

    println!("\nLoading {}...", slot);
    match manager.load(slot) {
        Some(loaded) => match CafeState::from_document(&loaded.document) {
            Ok(restored) => {
                let matches = if restored == state { "matches" } else { "differs from" };
                println!("  restored state {} the in-memory state", matches);
                println!(
                    "✓ Restored {} with {} coins and {} published memories",
                    restored.player.cafe_name,
                    restored.currencies.coins,
                    restored.memories.published.len()
                );
            }
            Err(e) => println!("✗ Loaded document does not match the game model: {}", e),
        },
        None => println!("✗ Load failed"),
    }
}
