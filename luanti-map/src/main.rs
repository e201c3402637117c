//! Offline maintenance of Luanti worlds: generating, relighting, settling liquids and inspecting.

use std::{
    collections::{BTreeSet, VecDeque},
    fs,
    path::PathBuf,
    sync::Arc,
};

use anyhow::{Context as _, Result, bail};
use clap::{Parser, Subcommand};
use glam::I16Vec3;
use log::{LevelFilter, debug, info, warn};
use luanti_core::{LightBank, MapBlockPos, MapNodePos};
use luanti_map::{
    emerge::{EmergeManager, EmergeTicket},
    generation::{MapGenerator, create_generator},
    map::ServerMap,
    map_block::ModifiedState,
    node_def::{ContentFeatures, DrawType, LiquidType, NodeDefManager, NodeDefRegistry, ParamType2},
    priority::Priority,
    settings::MapSettings,
    storage::{MapDatabase, MapDatabaseAccessor, SqliteDatabase},
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// World directory containing `map.sqlite`
    #[arg(short, long)]
    world: PathBuf,

    /// Settings file in `minetest.conf` format
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Map database consulted for blocks missing from the world; never written to
    #[arg(long)]
    read_only_world: Option<PathBuf>,

    /// Map seed, overrides `fixed_map_seed`
    #[arg(long)]
    seed: Option<u64>,

    /// Map generator, overrides `mg_name`
    #[arg(long)]
    mapgen: Option<String>,

    /// Verbosity level (up to -vvv)
    #[arg(short, long, default_value_t = 0, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generates (or loads) every block of an area
    Generate(Area),
    /// Recomputes the light of every stored block of an area
    Relight(Area),
    /// Lets the liquids of an area flow until they settle
    Liquids {
        #[command(flatten)]
        area: Area,
        /// Upper bound for the number of liquid passes
        #[arg(long, default_value_t = 256)]
        passes: usize,
    },
    /// Prints a single node
    Inspect {
        /// Node position as `x,y,z`
        #[arg(value_parser = parse_vec)]
        pos: I16Vec3,
    },
}

/// An inclusive range of block positions.
#[derive(clap::Args, Debug)]
struct Area {
    /// First block as `x,y,z`
    #[arg(long, value_parser = parse_vec, default_value = "0,0,0")]
    from: I16Vec3,
    /// Last block as `x,y,z`
    #[arg(long, value_parser = parse_vec, default_value = "0,0,0")]
    to: I16Vec3,
}

impl Area {
    fn blocks(&self) -> Result<(MapBlockPos, MapBlockPos)> {
        let min = self.from.min(self.to);
        let max = self.from.max(self.to);
        match (MapBlockPos::new(min), MapBlockPos::new(max)) {
            (Some(min), Some(max)) => Ok((min, max)),
            _ => bail!("block area {min} .. {max} exceeds the map"),
        }
    }
}

fn parse_vec(text: &str) -> Result<I16Vec3, String> {
    let parts: Vec<_> = text.split(',').map(str::trim).collect();
    let [x, y, z] = parts.as_slice() else {
        return Err(format!("expected x,y,z but got '{text}'"));
    };
    let parse = |value: &str| {
        value
            .parse::<i16>()
            .map_err(|error| format!("invalid coordinate '{value}': {error}"))
    };
    Ok(I16Vec3::new(parse(x)?, parse(y)?, parse(z)?))
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = match args.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::builder()
        .filter_level(level)
        .parse_default_env()
        .init();

    let mut settings = match &args.config {
        Some(path) => MapSettings::load(path)?,
        None => MapSettings::default(),
    };
    if let Some(mapgen) = &args.mapgen {
        settings.mg_name.clone_from(mapgen);
    }
    let seed = args.seed.or(settings.fixed_map_seed).unwrap_or_default();
    let generator = create_generator(&settings)?;
    let node_defs = demo_content(&generator);

    let database = open_database(&args)?;
    let (map, mut events) = ServerMap::new(node_defs, settings, database);
    let map = Arc::new(map);

    match &args.command {
        Command::Generate(area) => generate(&map, generator, seed, area)?,
        Command::Relight(area) => relight(&map, area)?,
        Command::Liquids { area, passes } => settle_liquids(&map, area, *passes)?,
        Command::Inspect { pos } => inspect(&map, *pos)?,
    }

    let mut edits = 0_usize;
    while events.try_recv().is_ok() {
        edits += 1;
    }
    debug!("{edits} map edit event(s)");

    let report = map.save(ModifiedState::WriteAtUnload, None);
    info!("saved {} block(s)", report.saved);
    if report.failed > 0 {
        bail!("{} block(s) could not be saved", report.failed);
    }
    Ok(())
}

fn open_database(args: &Args) -> Result<MapDatabaseAccessor> {
    fs::create_dir_all(&args.world)
        .with_context(|| format!("cannot create world directory {}", args.world.display()))?;
    let primary: Box<dyn MapDatabase> = Box::new(SqliteDatabase::open_world(&args.world)?);
    let mut accessor = MapDatabaseAccessor::new(primary);
    if let Some(path) = &args.read_only_world {
        accessor = accessor.with_secondary(Box::new(SqliteDatabase::open_read_only(path)?));
    }
    Ok(accessor)
}

/// A minimal set of nodes the map generators can work with.
fn demo_content(generator: &Arc<dyn MapGenerator>) -> Arc<NodeDefManager> {
    let mut registry = NodeDefRegistry::new();

    for name in ["basenodes:stone", "basenodes:sand"] {
        registry.register(ContentFeatures {
            is_ground_content: true,
            groups: [("cracky".to_owned(), 3)].into(),
            ..ContentFeatures::named(name)
        });
    }
    for name in ["basenodes:dirt", "basenodes:dirt_with_grass"] {
        registry.register(ContentFeatures {
            is_ground_content: true,
            groups: [("crumbly".to_owned(), 3), ("soil".to_owned(), 1)].into(),
            ..ContentFeatures::named(name)
        });
    }
    let water = |name: &str, liquid_type, drawtype, param_type_2| ContentFeatures {
        drawtype,
        liquid_type,
        param_type_2,
        light_propagates: true,
        walkable: false,
        pointable: false,
        diggable: false,
        buildable_to: true,
        liquid_alternative_flowing: "basenodes:water_flowing".to_owned(),
        liquid_alternative_source: "basenodes:water_source".to_owned(),
        liquid_viscosity: 1,
        liquid_range: 8,
        ..ContentFeatures::named(name)
    };
    registry.register(water(
        "basenodes:water_source",
        LiquidType::Source,
        DrawType::Liquid,
        ParamType2::None,
    ));
    registry.register(water(
        "basenodes:water_flowing",
        LiquidType::Flowing,
        DrawType::FlowingLiquid,
        ParamType2::FlowingLiquid,
    ));

    for (alias, target) in [
        ("mapgen_stone", "basenodes:stone"),
        ("mapgen_sand", "basenodes:sand"),
        ("mapgen_dirt", "basenodes:dirt"),
        ("mapgen_dirt_with_grass", "basenodes:dirt_with_grass"),
        ("mapgen_water_source", "basenodes:water_source"),
    ] {
        registry.set_alias(alias, target);
    }
    registry.add_resolver(generator.node_resolver());
    registry.freeze()
}

#[derive(Default)]
struct Tally {
    ready: usize,
    failed: usize,
}

impl Tally {
    fn finish(&mut self, ticket: EmergeTicket) {
        let pos = ticket.pos();
        match pollster::block_on(ticket) {
            Ok(_) => self.ready += 1,
            Err(failure) => {
                warn!("block {pos} is unavailable: {failure}");
                self.failed += 1;
            }
        }
    }
}

fn generate(
    map: &Arc<ServerMap>,
    generator: Arc<dyn MapGenerator>,
    seed: u64,
    area: &Area,
) -> Result<()> {
    let (min, max) = area.blocks()?;
    let center = MapBlockPos::new((min.vec() + max.vec()) / 2).unwrap_or(min);
    let emerge = EmergeManager::start(Arc::clone(map), Some(generator), seed)?;

    let mut tally = Tally::default();
    let mut pending = VecDeque::new();
    for pos in MapBlockPos::iter_area(min, max) {
        let priority = Priority::from_block_distance(center, pos, f32::INFINITY);
        let ticket = loop {
            if let Some(ticket) = emerge.request_block(pos, priority) {
                break ticket;
            }
            // the queue is full; wait for the oldest request to make room
            let Some(oldest) = pending.pop_front() else {
                bail!("the emerge queue does not accept any request");
            };
            tally.finish(oldest);
        };
        pending.push_back(ticket);
    }
    for ticket in pending {
        tally.finish(ticket);
    }
    info!(
        "{} block(s) available, {} unavailable",
        tally.ready, tally.failed
    );
    Ok(())
}

fn relight(map: &ServerMap, area: &Area) -> Result<()> {
    let (min, max) = area.blocks()?;
    let mut worklist = BTreeSet::new();
    for pos in MapBlockPos::iter_area(min, max) {
        if map.emerge_block(pos, false)?.is_some() {
            worklist.insert(pos);
        }
    }
    info!("relighting {} block(s)", worklist.len());
    map.update_lighting(&mut worklist, None);
    Ok(())
}

fn settle_liquids(map: &ServerMap, area: &Area, passes: usize) -> Result<()> {
    let (min, max) = area.blocks()?;
    let node_defs = Arc::clone(map.node_defs());
    for pos in MapBlockPos::iter_area(min, max) {
        let Some(handle) = map.emerge_block(pos, false)? else {
            continue;
        };
        let liquids: Vec<_> = {
            let block = handle.lock();
            block
                .nodes()
                .iter()
                .filter(|(_, node)| node_defs.node(**node).is_liquid())
                .map(|(index, _)| pos.node_pos(index))
                .collect()
        };
        for node_pos in liquids {
            map.transforming_liquid_add(node_pos);
        }
    }

    for pass in 0..passes {
        let queued = map.transforming_liquid_size();
        if queued == 0 {
            info!("liquids settled after {pass} pass(es)");
            return Ok(());
        }
        let modified = map.transform_liquids(None);
        debug!(
            "liquid pass {pass}: {queued} node(s) queued, {} block(s) modified",
            modified.len()
        );
    }
    warn!(
        "liquids did not settle, {} node(s) still queued",
        map.transforming_liquid_size()
    );
    Ok(())
}

#[expect(clippy::print_stdout, reason = "this is the output of the command")]
fn inspect(map: &ServerMap, pos: I16Vec3) -> Result<()> {
    let pos = MapNodePos(pos);
    let node = map.get_node_or_load(pos)?;
    let node_defs = map.node_defs();
    println!(
        "{pos}: {} (id {}), param1 {}, param2 {}",
        node_defs.name(node.content_id),
        node.content_id.0,
        node.param1,
        node.param2
    );

    let (block_pos, index) = pos.split_index();
    if let Some(handle) = map.blocks().get(block_pos) {
        let block = handle.lock();
        println!(
            "light: day {}, night {}; block {block_pos} generated: {}, underground: {}",
            block.light(index, LightBank::Day, node_defs),
            block.light(index, LightBank::Night, node_defs),
            block.generated(),
            block.is_underground
        );
    }
    if let Some(metadata) = map.get_node_metadata(pos) {
        for (key, var) in &metadata.vars {
            let private = if var.private { " (private)" } else { "" };
            println!("  {key}{private} = {}", String::from_utf8_lossy(&var.value));
        }
    }
    if let Some(timer) = map.get_node_timer(pos) {
        println!("  timer: {timer:?}");
    }
    Ok(())
}
