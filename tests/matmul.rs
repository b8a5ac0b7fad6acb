use gemtile::arch::gemmini::Activation;
use gemtile::log::init_log;
use gemtile::reference::matmul_cpu;
use gemtile::tiling::{plan_matmul, MatmulTile};
use gemtile::workload::{run_matmul, trace_matmul, TensorGen};
use gemtile::{tiled_matmul, Dataflow, Gemmini, HardwareCapacity, MatmulDims, MatmulOperands, MatmulParams};

macro_rules! matmul_case {
  ($name:ident, ($i:expr, $j:expr, $k:expr), $dataflow:expr, bias = $bias:expr, $params:expr) => {
    #[test]
    fn $name() {
      init_log();
      let cap = HardwareCapacity::default();
      let report = run_matmul(&cap, MatmulDims::new($i, $j, $k), &$params, $dataflow, $bias, 7).unwrap();
      assert!(report.passed(), "{:?}", report);
    }
  };
}

matmul_case!(ws_aligned, (64, 64, 64), Dataflow::WS, bias = false, MatmulParams::default());
matmul_case!(os_aligned, (64, 64, 64), Dataflow::OS, bias = false, MatmulParams::default());
matmul_case!(ws_ragged_with_bias, (37, 53, 71), Dataflow::WS, bias = true, MatmulParams::default());
matmul_case!(os_ragged_with_bias, (37, 53, 71), Dataflow::OS, bias = true, MatmulParams::default());
matmul_case!(ws_single_element, (1, 1, 1), Dataflow::WS, bias = true, MatmulParams::default());
matmul_case!(os_single_element, (1, 1, 1), Dataflow::OS, bias = false, MatmulParams::default());
matmul_case!(
  ws_repeating_bias,
  (40, 24, 30),
  Dataflow::WS,
  bias = true,
  MatmulParams {
    repeating_bias: true,
    ..MatmulParams::default()
  }
);
matmul_case!(
  os_repeating_bias,
  (40, 24, 30),
  Dataflow::OS,
  bias = true,
  MatmulParams {
    repeating_bias: true,
    ..MatmulParams::default()
  }
);
matmul_case!(
  ws_relu_scaled,
  (48, 20, 64),
  Dataflow::WS,
  bias = true,
  MatmulParams {
    act: Activation::Relu,
    acc_scale: 0.25,
    ..MatmulParams::default()
  }
);
matmul_case!(
  ws_a_transpose,
  (33, 17, 45),
  Dataflow::WS,
  bias = false,
  MatmulParams {
    a_transpose: true,
    ..MatmulParams::default()
  }
);
matmul_case!(
  ws_b_transpose,
  (33, 17, 45),
  Dataflow::WS,
  bias = true,
  MatmulParams {
    b_transpose: true,
    ..MatmulParams::default()
  }
);
matmul_case!(
  ws_full_width_output,
  (30, 30, 200),
  Dataflow::WS,
  bias = true,
  MatmulParams {
    full_c: true,
    ..MatmulParams::default()
  }
);
matmul_case!(
  os_full_width_output,
  (30, 30, 200),
  Dataflow::OS,
  bias = true,
  MatmulParams {
    full_c: true,
    ..MatmulParams::default()
  }
);
matmul_case!(
  ws_low_precision_bias,
  (20, 36, 50),
  Dataflow::WS,
  bias = true,
  MatmulParams {
    low_d: true,
    ..MatmulParams::default()
  }
);
matmul_case!(ws_long_reduction, (16, 16, 1500), Dataflow::WS, bias = true, MatmulParams::default());
matmul_case!(cpu_ragged_with_bias, (37, 53, 71), Dataflow::CPU, bias = true, MatmulParams::default());
matmul_case!(
  cpu_repeating_bias,
  (40, 24, 30),
  Dataflow::CPU,
  bias = true,
  MatmulParams {
    repeating_bias: true,
    d_scale: 2.0,
    ..MatmulParams::default()
  }
);

/// Run one matmul with an explicit tile and return its output.
fn run_with_tile(dims: MatmulDims, tile: MatmulTile, dataflow: Dataflow) -> Vec<i8> {
  let cap = HardwareCapacity::default();
  let params = MatmulParams::default();
  let mut gen = TensorGen::new(11);
  let a = gen.i8_tensor(dims.i * dims.k);
  let b = gen.i8_tensor(dims.k * dims.j);
  let d = gen.i32_tensor(dims.i * dims.j);

  let mut gemmini = Gemmini::new(cap);
  let a_addr = gemmini.dram.alloc_i8(&a);
  let b_addr = gemmini.dram.alloc_i8(&b);
  let d_addr = gemmini.dram.alloc_i32(&d);
  let c_addr = gemmini.dram.alloc(dims.i * dims.j);
  let operands = MatmulOperands::packed(dims, &params, a_addr, b_addr, Some(d_addr), c_addr);
  tiled_matmul(&mut gemmini, &cap, dims, &operands, &params, tile, dataflow).unwrap();

  let expected = matmul_cpu(dims, &a, dims.k, &b, dims.j, Some((&d, dims.j)), &params);
  let actual = gemmini.dram.read_i8_vec(c_addr, dims.i * dims.j);
  assert_eq!(actual, expected, "tile {:?} under {:?}", tile, dataflow);
  actual
}

#[test]
fn tiling_is_not_observable() {
  init_log();
  let dims = MatmulDims::new(50, 40, 70);
  let reference = run_with_tile(dims, MatmulTile::new(1, 1, 1), Dataflow::WS);
  for tile in [MatmulTile::new(4, 3, 5), MatmulTile::new(2, 3, 1), MatmulTile::new(4, 1, 2)] {
    assert_eq!(run_with_tile(dims, tile, Dataflow::WS), reference);
    assert_eq!(run_with_tile(dims, tile, Dataflow::OS), reference);
  }
}

#[test]
fn cpu_target_matches_ws() {
  init_log();
  let cap = HardwareCapacity::default();
  for dims in [MatmulDims::new(50, 40, 70), MatmulDims::new(1, 33, 9), MatmulDims::new(64, 64, 64)] {
    let ws = run_with_tile(dims, plan_matmul(dims, Dataflow::WS, &cap), Dataflow::WS);
    let cpu = run_with_tile(dims, plan_matmul(dims, Dataflow::CPU, &cap), Dataflow::CPU);
    assert_eq!(cpu, ws, "{:?}", dims);
  }
}

#[test]
fn cpu_target_rejects_wide_and_transposed_operands() {
  let cap = HardwareCapacity::default();
  let dims = MatmulDims::new(16, 16, 16);
  let modes = [
    MatmulParams {
      a_transpose: true,
      ..MatmulParams::default()
    },
    MatmulParams {
      b_transpose: true,
      ..MatmulParams::default()
    },
    MatmulParams {
      full_c: true,
      ..MatmulParams::default()
    },
    MatmulParams {
      low_d: true,
      ..MatmulParams::default()
    },
  ];
  for params in &modes {
    let err = run_matmul(&cap, dims, params, Dataflow::CPU, true, 0).unwrap_err();
    assert!(err.is_configuration(), "{:?}", params);
  }
}

#[test]
fn cpu_target_needs_host_memory() {
  let cap = HardwareCapacity::default();
  let err = trace_matmul(&cap, MatmulDims::new(16, 16, 16), &MatmulParams::default(), Dataflow::CPU).unwrap_err();
  assert!(err.is_configuration());
}

#[test]
fn auto_tiling_is_idempotent() {
  let cap = HardwareCapacity::default();
  let dims = MatmulDims::new(300, 200, 500);
  assert_eq!(plan_matmul(dims, Dataflow::WS, &cap), plan_matmul(dims, Dataflow::WS, &cap));

  let first = run_matmul(&cap, MatmulDims::new(70, 50, 90), &MatmulParams::default(), Dataflow::WS, true, 5).unwrap();
  let second = run_matmul(&cap, MatmulDims::new(70, 50, 90), &MatmulParams::default(), Dataflow::WS, true, 5).unwrap();
  assert_eq!(first.plan, second.plan);
  assert_eq!(first.instructions, second.instructions);
  assert!(first.passed() && second.passed());
}

#[test]
fn transposed_os_is_rejected() {
  let cap = HardwareCapacity::default();
  let params = MatmulParams {
    a_transpose: true,
    ..MatmulParams::default()
  };
  let err = run_matmul(&cap, MatmulDims::new(16, 16, 16), &params, Dataflow::OS, false, 0).unwrap_err();
  assert!(err.is_configuration());
}

#[test]
fn small_array_instance() {
  let cap = HardwareCapacity {
    dim: 4,
    bank_num: 4,
    bank_rows: 64,
    acc_rows: 64,
    max_bytes: 16,
  };
  for dataflow in [Dataflow::WS, Dataflow::OS] {
    let report = run_matmul(&cap, MatmulDims::new(23, 19, 31), &MatmulParams::default(), dataflow, true, 3).unwrap();
    assert!(report.passed(), "{:?}", report);
  }
}
