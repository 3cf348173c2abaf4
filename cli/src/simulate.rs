// Random-walk radio simulation
//
// Every ship is a grid with one antenna and one programmable block. Ships
// drift around a cube; antennas in range of each other form components.
// Ship 0's block periodically sends a status message to the block of the
// last ship, which only arrives while the two share a component.

use crate::config::{Config, SimulationConfig};
use anyhow::{Context, Result};
use colored::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use relaynet_core::message::Message;
use relaynet_core::relay::client::collecting_handler;
use relaynet_core::relay::{Radio, RadioSettings, RelayClient};
use relaynet_core::testing::{FixedRelations, TestEntity};
use relaynet_core::{ManualClock, MessageHandler, RelayNetwork, SnapshotStore, Vec3};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Game time advanced per tick
const TICK: Duration = Duration::from_millis(1000 / 60);

/// Ticks between status messages
const SEND_INTERVAL: u64 = 30;

struct Ship {
    grid: TestEntity,
    prog: Arc<RelayClient>,
}

pub struct Options {
    pub ticks: u64,
    pub seed: Option<u64>,
    pub report_every: u64,
    pub save: bool,
}

pub async fn run(config: &Config, options: Options) -> Result<()> {
    let sim = &config.simulation;
    if sim.ships < 2 {
        anyhow::bail!("Simulation needs at least 2 ships, sim.ships is {}", sim.ships);
    }

    let clock = Arc::new(ManualClock::default());
    let net = RelayNetwork::new(
        config.relay.clone(),
        clock.clone(),
        Arc::new(FixedRelations::new()),
    )
    .context("Failed to create relay network")?;

    let mut rng = match options.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let (handler, inbox) = collecting_handler();
    let mut handler = Some(handler);
    let mut ships = Vec::with_capacity(sim.ships);
    for index in 0..sim.ships {
        // The last ship listens; faction 0 so ship 0 may message it
        let listening = index + 1 == sim.ships;
        let owner = if listening { 0 } else { (index % sim.factions) as i64 };
        let ship_handler = if listening { handler.take() } else { None };
        ships.push(spawn_ship(&net, sim, index, owner, &mut rng, ship_handler)?);
    }

    println!(
        "{} {} ships, {} factions, antenna range {:.0} m",
        "Simulating".bold(),
        sim.ships,
        sim.factions,
        sim.radius
    );

    let mut interval = tokio::time::interval(Duration::from_millis(sim.tick_millis.max(1)));
    let mut sent = 0usize;
    for _ in 0..options.ticks {
        interval.tick().await;

        for ship in &ships {
            drift(ship, sim, &mut rng);
        }
        clock.advance(TICK);
        let tick = net.tick();

        if tick % SEND_INTERVAL == 0 {
            let target = &ships[ships.len() - 1];
            let name = format!(
                "Prog[.[{}:prog:status at tick {}].]",
                target.grid.handle().display_name(),
                tick
            );
            if let Ok((_, count)) = ships[0].prog.send_from_name(net.registry(), &name) {
                sent += count;
            }
        }

        if tick % options.report_every.max(1) == 0 {
            report(&net, tick);
        }
    }

    let received = inbox.lock().len();
    println!();
    println!(
        "{} sent {}, received {}",
        "Messages:".bold(),
        sent,
        received.to_string().green()
    );
    if let Some(last) = inbox.lock().last() {
        print_message(last);
    }

    if options.save {
        let path = config.snapshot_path()?;
        save(&net, &path)?;
    }

    net.shutdown();
    Ok(())
}

fn spawn_ship(
    net: &RelayNetwork,
    sim: &SimulationConfig,
    index: usize,
    owner: i64,
    rng: &mut StdRng,
    handler: Option<MessageHandler>,
) -> Result<Ship> {
    let base = (index as i64 + 1) * 10;
    let grid = TestEntity::grid(base, owner).named(&format!("Ship {}", index));
    let half = sim.area / 2.0;
    grid.set_position(Vec3::new(
        rng.gen_range(-half..=half),
        rng.gen_range(-half..=half),
        rng.gen_range(-half..=half),
    ));

    let antenna = TestEntity::block(base + 1, owner)
        .named("Antenna")
        .attached_to(&grid);
    net.add_node(
        antenna.handle(),
        Box::new(Radio::new(RadioSettings::antenna(sim.radius))),
    )?;

    let prog = TestEntity::block(base + 2, owner)
        .named("Prog")
        .attached_to(&grid);
    let prog = net.add_client(prog.handle(), handler)?;

    Ok(Ship { grid, prog })
}

fn drift(ship: &Ship, sim: &SimulationConfig, rng: &mut StdRng) {
    let half = sim.area / 2.0;
    let mut step = || rng.gen_range(-sim.step..=sim.step);
    let delta = Vec3::new(step(), step(), step());
    let position = ship.grid.handle().position() + delta;
    let clamp = |v: f64| v.clamp(-half, half);
    ship.grid
        .set_position(Vec3::new(clamp(position.x), clamp(position.y), clamp(position.z)));
    ship.grid.set_velocity(delta * (1000.0 / TICK.as_millis() as f64));
}

fn report(net: &RelayNetwork, tick: u64) {
    let storages = net.storages();
    println!(
        "{} {:>5}  {} components",
        "tick".dimmed(),
        tick,
        storages.len().to_string().bright_cyan()
    );
    for storage in storages {
        let members: Vec<String> = net
            .registry()
            .nodes()
            .iter()
            .filter(|node| node.storage().is_some_and(|s| Arc::ptr_eq(&s, &storage)))
            .map(|node| node.id().to_string())
            .collect();
        println!(
            "  {:<6} primary {:<4} contacts {:<3} messages {:<3} nodes [{}]",
            storage.id().to_string().yellow(),
            storage.primary_id(),
            storage.contact_count(),
            storage.message_count(),
            members.join(", ")
        );
    }
}

fn print_message(message: &Message) {
    println!(
        "  last: {} from {}/{}",
        message.content().bright_white(),
        message.source_grid_name(),
        message.source_block_name()
    );
}

fn save(net: &RelayNetwork, path: &Path) -> Result<()> {
    let store = SnapshotStore::open(path)
        .with_context(|| format!("Failed to open snapshot database {}", path.display()))?;
    let saved = net.save(&store).context("Failed to save snapshots")?;
    info!("Saved {} storages to {}", saved, path.display());
    println!("{} {} storages to {}", "Saved".green(), saved, path.display());
    Ok(())
}
