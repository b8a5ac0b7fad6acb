use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;

use gemtile::config::{apply_cli_overrides, load_config, validate_config, CliOverrides, GemtileConfig};
use gemtile::log::init_log_with;
use gemtile::tiling::{plan_conv, plan_matmul, GrowthPolicy};
use gemtile::workload::{run_conv, run_matmul, run_resadd, trace_conv, trace_matmul, RunReport};
use gemtile::{ConvParams, ConvShape, Dataflow, MatmulDims, MatmulParams, Pool, ResaddParams, Result};

/// Gemtile - tile planner and instruction issuer for a systolic-array accelerator
#[derive(Parser, Debug)]
#[command(name = "gemtile")]
#[command(version = "0.1.0")]
#[command(about = "Plan tiles and run tiled matmul/conv workloads on the accelerator model", long_about = None)]
struct Cli {
  /// Configuration file layered over the built-in defaults
  #[arg(short, long, value_name = "FILE", global = true)]
  config: Option<PathBuf>,

  /// Systolic array edge
  #[arg(long, global = true)]
  dim: Option<usize>,

  /// Dataflow: os, ws, or cpu to compute on the host
  #[arg(long, global = true)]
  dataflow: Option<Dataflow>,

  /// Seed of the random workload
  #[arg(long, global = true)]
  seed: Option<u64>,

  /// Do not fail when the result differs from the CPU oracle
  #[arg(long, global = true)]
  no_check: bool,

  /// Record the instruction stream instead of simulating it
  #[arg(long, global = true)]
  dry_run: bool,

  /// Print JSON instead of text
  #[arg(long, global = true)]
  json: bool,

  /// Log at debug level unless RUST_LOG says otherwise
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Print the auto tile plan of a matmul
  PlanMatmul(MatmulArgs),
  /// Print the auto tile plan of a convolution
  PlanConv(ConvArgs),
  /// Run a random matmul and compare it with the CPU oracle
  Matmul(MatmulArgs),
  /// Run a random convolution and compare it with the CPU oracle
  Conv(ConvArgs),
  /// Run a random residual add and compare it with the CPU oracle
  Resadd {
    #[arg(short)]
    i: usize,
    #[arg(short)]
    j: usize,
    #[arg(long)]
    relu: bool,
  },
  /// 4x224x224x3 input, 32 output channels, 3x3 kernel, stride 2, padding 1
  Scenario {
    /// Fuse a 3x3 stride-2 padding-1 max-pool
    #[arg(long)]
    pool: bool,
    /// Batch size
    #[arg(long, default_value_t = 4)]
    batch: usize,
  },
}

#[derive(Args, Debug)]
struct MatmulArgs {
  #[arg(short)]
  i: usize,
  #[arg(short)]
  j: usize,
  #[arg(short)]
  k: usize,
  /// Add a bias matrix
  #[arg(long)]
  bias: bool,
  /// Broadcast a single bias row
  #[arg(long)]
  repeating_bias: bool,
  #[arg(long)]
  relu: bool,
}

#[derive(Args, Debug)]
struct ConvArgs {
  #[arg(long, default_value_t = 1)]
  batch: usize,
  #[arg(long)]
  in_dim: usize,
  #[arg(long)]
  in_channels: usize,
  #[arg(long)]
  out_channels: usize,
  #[arg(long, default_value_t = 1)]
  stride: usize,
  #[arg(long, default_value_t = 0)]
  padding: usize,
  #[arg(long, default_value_t = 3)]
  kernel: usize,
  #[arg(long)]
  depthwise: bool,
  /// Pool window; pooling is off when absent
  #[arg(long)]
  pool_size: Option<usize>,
  #[arg(long, default_value_t = 1)]
  pool_stride: usize,
  #[arg(long, default_value_t = 0)]
  pool_padding: usize,
  /// Growth policy; classified from the shape when absent
  #[arg(long, value_parser = parse_policy)]
  policy: Option<GrowthPolicy>,
  #[arg(long)]
  bias: bool,
  #[arg(long)]
  relu: bool,
}

fn parse_policy(s: &str) -> std::result::Result<GrowthPolicy, String> {
  serde_json::from_value(serde_json::Value::String(s.to_string())).map_err(|e| e.to_string())
}

impl MatmulArgs {
  fn dims(&self) -> MatmulDims {
    MatmulDims::new(self.i, self.j, self.k)
  }

  fn params(&self) -> MatmulParams {
    MatmulParams {
      repeating_bias: self.repeating_bias,
      act: if self.relu { gemtile::arch::gemmini::Activation::Relu } else { Default::default() },
      ..MatmulParams::default()
    }
  }
}

impl ConvArgs {
  fn shape(&self) -> ConvShape {
    if self.depthwise {
      ConvShape::depthwise(self.batch, self.in_dim, self.in_channels, self.stride, self.padding, self.kernel)
    } else {
      ConvShape::new(
        self.batch,
        self.in_dim,
        self.in_channels,
        self.out_channels,
        self.stride,
        self.padding,
        self.kernel,
      )
    }
  }

  fn params(&self) -> ConvParams {
    ConvParams {
      act: if self.relu { gemtile::arch::gemmini::Activation::Relu } else { Default::default() },
      pool: self.pool_size.map(|size| Pool {
        size,
        stride: self.pool_stride,
        padding: self.pool_padding,
      }),
      ..ConvParams::default()
    }
  }
}

fn print<T: Serialize + std::fmt::Debug>(json: bool, value: &T) -> Result<()> {
  if json {
    let text = serde_json::to_string_pretty(value)
      .map_err(|e| gemtile::GemtileError::configuration(format!("cannot serialize output: {}", e)))?;
    println!("{}", text);
  } else {
    println!("{:#?}", value);
  }
  Ok(())
}

/// Print a run report; `Ok(false)` when the check failed.
fn report<P: Serialize + std::fmt::Debug>(cli: &Cli, config: &GemtileConfig, report: &RunReport<P>) -> Result<bool> {
  print(cli.json, report)?;
  if !report.passed() {
    log::error!("{} of {} elements differ from the CPU oracle", report.mismatches, report.elements);
  }
  Ok(report.passed() || !config.run.check)
}

fn run(cli: &Cli, config: &GemtileConfig) -> Result<bool> {
  let cap = &config.hardware;
  let run = &config.run;

  match &cli.command {
    Command::PlanMatmul(args) => {
      print(cli.json, &plan_matmul(args.dims(), run.dataflow, cap))?;
      Ok(true)
    },
    Command::PlanConv(args) => {
      let shape = args.shape();
      shape.validate()?;
      let policy = args.policy.unwrap_or_else(|| GrowthPolicy::classify(&shape, cap));
      print(cli.json, &plan_conv(&shape, &args.params(), policy, cap)?)?;
      Ok(true)
    },
    Command::Matmul(args) if run.dry_run => {
      let (tile, trace) = trace_matmul(cap, args.dims(), &args.params(), run.dataflow)?;
      log::info!("tile {:?}, {} instructions", tile, trace.len());
      print(cli.json, &trace)?;
      Ok(true)
    },
    Command::Matmul(args) => {
      let result = run_matmul(cap, args.dims(), &args.params(), run.dataflow, args.bias, run.seed)?;
      report(cli, config, &result)
    },
    Command::Conv(args) if run.dry_run => {
      let (plan, trace) = trace_conv(cap, &args.shape(), &args.params(), run.dataflow)?;
      log::info!("plan {:?}, {} instructions", plan, trace.len());
      print(cli.json, &trace)?;
      Ok(true)
    },
    Command::Conv(args) => {
      let result = run_conv(cap, &args.shape(), &args.params(), run.dataflow, args.bias, run.seed)?;
      report(cli, config, &result)
    },
    Command::Resadd { i, j, relu } => {
      let params = ResaddParams {
        relu: *relu,
        ..ResaddParams::default()
      };
      let result = run_resadd(cap, *i, *j, &params, run.dataflow, run.seed)?;
      report(cli, config, &result)
    },
    Command::Scenario { pool, batch } => {
      let shape = ConvShape::new(*batch, 224, 3, 32, 2, 1, 3);
      let params = ConvParams {
        pool: pool.then_some(Pool {
          size: 3,
          stride: 2,
          padding: 1,
        }),
        ..ConvParams::default()
      };
      let result = run_conv(cap, &shape, &params, run.dataflow, true, run.seed)?;
      report(cli, config, &result)
    },
  }
}

fn main() -> ExitCode {
  let cli = Cli::parse();
  init_log_with(if cli.verbose { "debug" } else { "warn" });

  let config = load_config(cli.config.as_deref()).and_then(|mut config| {
    apply_cli_overrides(
      &mut config,
      &CliOverrides {
        dim: cli.dim,
        dataflow: cli.dataflow,
        seed: cli.seed,
        no_check: cli.no_check,
        dry_run: cli.dry_run,
      },
    );
    validate_config(&config)?;
    Ok(config)
  });

  match config.and_then(|config| run(&cli, &config)) {
    Ok(true) => ExitCode::SUCCESS,
    Ok(false) => ExitCode::FAILURE,
    Err(err) => {
      eprintln!("gemtile: {}", err);
      ExitCode::from(2)
    },
  }
}
