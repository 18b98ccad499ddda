use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;
use hypergraph_sclam::assembler::GraphAssembler;
use hypergraph_sclam::config::SclamConfig;
use hypergraph_sclam::init_logger;
use hypergraph_sclam::io::{CalibrationReport, HypergraphFile, OutputWriter, StreamReader};
use hypergraph_sclam::optimizer::OptimizerType;
use hypergraph_sclam::scheduler::AlternatingScheduler;
use hypergraph_sclam::{SclamError, SclamResult};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "sclam_optimizer")]
#[command(about = "Jointly estimate the trajectory, sensor offsets and odometry bias of a logged run")]
struct Args {
    /// Tagged measurement stream produced by the parser
    input: PathBuf,

    /// Output path prefix; `<prefix>.txt`, `<prefix>_sick.txt`, ... are written
    output_prefix: PathBuf,

    /// Optimization config file (defaults are used if it cannot be read)
    #[arg(default_value = "optimization_config.txt")]
    config: PathBuf,

    /// Override the number of outer rounds
    #[arg(long)]
    outer: Option<usize>,

    /// Override the solver iterations of the pose phase
    #[arg(long)]
    pose_iterations: Option<usize>,

    /// Override the solver iterations of the calibration phase
    #[arg(long)]
    calib_iterations: Option<usize>,

    /// Save the assembled hypergraph before optimizing
    #[arg(long)]
    save_graph: Option<PathBuf>,

    /// Optimize a hypergraph saved by an earlier run instead of the one assembled from
    /// the stream; the stream still supplies the GPS origin and fixes for the outputs
    #[arg(long)]
    load_graph: Option<PathBuf>,

    /// Re-propagate the pose initial estimates from the first pose
    #[arg(long)]
    reseed: bool,

    /// Use Gauss-Newton instead of Levenberg-Marquardt
    #[arg(long)]
    gauss_newton: bool,

    /// Initial Levenberg-Marquardt damping
    #[arg(long)]
    initial_damping: Option<f64>,

    /// Cost, parameter and gradient convergence tolerance of every solver call
    #[arg(long)]
    tolerance: Option<f64>,
}

fn run(args: &Args) -> SclamResult<()> {
    let mut config = SclamConfig::load(&args.config)?;
    if let Some(outer) = args.outer {
        config.outer_iterations = outer;
    }
    if let Some(iterations) = args.pose_iterations {
        config.inner_pose_iterations = iterations;
    }
    if let Some(iterations) = args.calib_iterations {
        config.inner_odom_calib_iterations = iterations;
    }

    let start = Instant::now();
    let records = StreamReader::load(&args.input)?;
    info!("Loaded {} records from {}", records.len(), args.input.display());

    let assembler = GraphAssembler::new(config.clone())?;
    let first_pose = assembler.pose_id(0);
    let mut assembly = assembler.assemble(&records)?;
    if let Some(path) = &args.load_graph {
        let registry = config.factor_registry();
        assembly.graph = HypergraphFile::load(path, &registry)?;
        info!(
            "Loaded hypergraph with {} vertices and {} edges from {}",
            assembly.graph.num_vertices(),
            assembly.graph.num_edges(),
            path.display()
        );
    }
    let graph = &mut assembly.graph;

    if args.reseed {
        if graph.vertex(first_pose).is_none() {
            return Err(SclamError::InvalidInput(format!(
                "cannot reseed: the stream has no pose 0 (vertex {first_pose})"
            )));
        }
        let seeded = graph.compute_initial_guess(&[first_pose])?;
        info!("Re-propagated {} pose estimates", seeded);
    }

    if let Some(path) = &args.save_graph {
        HypergraphFile::save(graph, path)?;
    }

    let optimizer_type = if args.gauss_newton {
        OptimizerType::GaussNewton
    } else {
        OptimizerType::LevenbergMarquardt
    };
    let mut solver = graph.optimizer_config().clone().with_optimizer_type(optimizer_type);
    if let Some(damping) = args.initial_damping {
        solver = solver.with_initial_damping(damping);
    }
    if let Some(tolerance) = args.tolerance {
        solver = solver
            .with_cost_tolerance(tolerance)
            .with_parameter_tolerance(tolerance)
            .with_gradient_tolerance(tolerance);
    }
    graph.set_optimizer_config(solver);

    let rounds = AlternatingScheduler::from_config(&config).run(graph)?;
    if let Some(last) = rounds.last() {
        info!("Final round:\n{}\n{}", last.pose, last.calibration);
    }

    let writer = OutputWriter::new(&args.output_prefix, assembly.origin);
    writer.write_poses(&assembly.graph)?;
    if config.use_gps {
        writer.write_fake_gps(&assembly.gps_fixes)?;
    }
    CalibrationReport::from_graph(&assembly.graph).publish();

    info!("Run finished in {:.2?}", start.elapsed());
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();

    init_logger();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Calibration of {} failed", args.input.display());
            error!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
