//! Upgrade simulator: runs a short scripted skirmish against the in-memory host
//! and prints each event report as JSON.
//!
//! Settings are read from `UPGRADE_SETTINGS` (a JSON file) when set.

use anyhow::Context;
use std::sync::Arc;
use tracing::info;

use upgrade_core::config::{ClusterSlot, Family, GrantSlot, PowerTier, UpgradeConfig};
use upgrade_core::engine::{EventQueue, UpgradeEngine};
use upgrade_core::events::{AttackEvent, AttackOutcome, DamageEvent, EventId, GameEvent};
use upgrade_core::grants::{ContentKind, ContentTemplate, StaticCatalog};
use upgrade_core::grid::GridPoint;
use upgrade_core::host::InMemoryHost;
use upgrade_core::logging::init_tracing;
use upgrade_core::model::{ActorKind, CharacterId, HitPoints, OwningCharacter, SourceEntity, SourceId, SourceKind, WeaponStyle};
use upgrade_core::settings::EngineSettings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = match std::env::var("UPGRADE_SETTINGS") {
        Ok(path) => EngineSettings::from_file(&path).with_context(|| format!("loading settings from {}", path))?,
        Err(_) => EngineSettings {
            dice_seed: Some(7),
            ..EngineSettings::default()
        },
    };
    init_tracing(&settings.tracing);

    let host = Arc::new(InMemoryHost::new());
    let hero = CharacterId::from("hero");
    let ally = CharacterId::from("squire");
    let orc = CharacterId::from("orc");

    let mut hero_doc = OwningCharacter::new("hero", "Aldric", ActorKind::Character);
    hero_doc.hp = HitPoints::new(30, 30);
    let mut plate = SourceEntity::new("plate", "Runed Plate", SourceKind::Armor { natural: false });
    plate.equipped = true;
    let mut bow = SourceEntity::new("bow", "Whisper Bow", SourceKind::Weapon(WeaponStyle::Ranged));
    bow.equipped = true;
    hero_doc.items.extend([plate, bow]);
    host.add_character(hero_doc);
    host.add_character(OwningCharacter::new("squire", "Bram", ActorKind::Character));
    let mut orc_doc = OwningCharacter::new("orc", "Orc Raider", ActorKind::Npc);
    let mut axe = SourceEntity::new("axe", "Notched Axe", SourceKind::Weapon(WeaponStyle::Melee));
    axe.equipped = true;
    orc_doc.items.push(axe);
    host.add_character(orc_doc);

    host.place_token(&hero, GridPoint::new(0, 0));
    host.place_token(&ally, GridPoint::new(1, 0));
    host.place_token(&orc, GridPoint::new(0, 1));

    let catalog = Arc::new(StaticCatalog::new().with_entry(ContentTemplate::new(
        "misty-step",
        "Misty Step",
        ContentKind::Spell,
        "Teleport up to 30 feet to an unoccupied space you can see.",
    )));
    let engine = Arc::new(UpgradeEngine::from_settings(settings, host.clone(), catalog)?);
    let queue = EventQueue::new(engine.clone());

    let plate_config = UpgradeConfig::new(PowerTier::Two)
        .with_cluster(ClusterSlot::First, Some(Family::Flux))
        .with_cluster(ClusterSlot::Third, Some(Family::Storm))
        .with_grant(GrantSlot::Spell, "misty-step");
    let bow_config = UpgradeConfig::new(PowerTier::Three).with_cluster(ClusterSlot::First, Some(Family::Blight));
    engine.configure(&hero, &SourceId::from("plate"), &plate_config).await?;
    engine.configure(&hero, &SourceId::from("bow"), &bow_config).await?;

    let script = vec![
        GameEvent::AttackResolved(AttackEvent {
            event_id: EventId::new("atk-1"),
            attacker: hero.clone(),
            target: Some(orc.clone()),
            source: SourceId::from("bow"),
            outcome: AttackOutcome::Hit {
                critical: false,
                damage_total: 7,
            },
        }),
        GameEvent::AttackResolved(AttackEvent {
            event_id: EventId::new("atk-2"),
            attacker: orc.clone(),
            target: Some(hero.clone()),
            source: SourceId::from("axe"),
            outcome: AttackOutcome::Hit {
                critical: false,
                damage_total: 18,
            },
        }),
        GameEvent::DamageIncoming(DamageEvent {
            event_id: EventId::new("dmg-2"),
            target: hero.clone(),
            attacker: Some(orc.clone()),
            amount: 18,
            attack: None,
        }),
        GameEvent::TurnStarted { character: orc.clone() },
        GameEvent::CombatRoundAdvanced { round: 2 },
        GameEvent::CombatEnded,
        GameEvent::RestCompleted { character: hero.clone() },
    ];

    for event in script {
        if let GameEvent::CombatRoundAdvanced { round } = event {
            host.set_round(round);
        }
        let report = queue.submit(event).await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    let final_state = host.snapshot(&hero).context("hero missing from host")?;
    info!(
        effects = final_state.effects.len(),
        grants = final_state.grants.len(),
        hp = final_state.hp.value,
        "simulation finished"
    );
    Ok(())
}
