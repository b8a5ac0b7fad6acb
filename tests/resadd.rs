use gemtile::driver::plan_resadd;
use gemtile::log::init_log;
use gemtile::reference::resadd_cpu;
use gemtile::workload::{run_resadd, TensorGen};
use gemtile::{tiled_resadd, Dataflow, Gemmini, HardwareCapacity, ResaddParams};

#[test]
fn aligned_sum() {
  init_log();
  let report = run_resadd(&HardwareCapacity::default(), 64, 64, &ResaddParams::default(), Dataflow::WS, 2).unwrap();
  assert!(report.passed(), "{:?}", report);
  assert_eq!(report.plan, (64, 64));
}

#[test]
fn ragged_sum_with_relu() {
  init_log();
  let params = ResaddParams {
    relu: true,
    ..ResaddParams::default()
  };
  let report = run_resadd(&HardwareCapacity::default(), 37, 93, &params, Dataflow::WS, 6).unwrap();
  assert!(report.passed(), "{:?}", report);
}

#[test]
fn scaled_operands() {
  init_log();
  let params = ResaddParams {
    a_scale: 2.0,
    b_scale: 0.5,
    c_scale: 0.5,
    relu: false,
  };
  let report = run_resadd(&HardwareCapacity::default(), 20, 40, &params, Dataflow::WS, 3).unwrap();
  assert!(report.passed(), "{:?}", report);
}

#[test]
fn tall_operation_is_split() {
  init_log();
  let cap = HardwareCapacity::default();
  let report = run_resadd(&cap, 600, 48, &ResaddParams::default(), Dataflow::WS, 12).unwrap();
  assert!(report.passed(), "{:?}", report);
  assert!(report.plan.0 < 600);
}

#[test]
fn explicit_tiles_agree() {
  init_log();
  let cap = HardwareCapacity::default();
  let (i, j) = (45, 70);
  let mut gen = TensorGen::new(17);
  let a = gen.i8_tensor(i * j);
  let b = gen.i8_tensor(i * j);
  let params = ResaddParams::default();
  let expected = resadd_cpu(i, j, &a, &b, &params);

  for (tile_i, tile_j) in [plan_resadd(i, j, &cap), (16, 16), (7, 33), (45, 1)] {
    for dataflow in [Dataflow::WS, Dataflow::CPU] {
      let mut gemmini = Gemmini::new(cap);
      let a_addr = gemmini.dram.alloc_i8(&a);
      let b_addr = gemmini.dram.alloc_i8(&b);
      let c_addr = gemmini.dram.alloc(i * j);
      tiled_resadd(&mut gemmini, &cap, i, j, tile_i, tile_j, &params, a_addr, b_addr, c_addr, dataflow).unwrap();
      let actual = gemmini.dram.read_i8_vec(c_addr, i * j);
      assert_eq!(actual, expected, "tile {}x{} under {:?}", tile_i, tile_j, dataflow);
    }
  }
}

#[test]
fn cpu_sum_matches_ws() {
  init_log();
  let cap = HardwareCapacity::default();
  let params = ResaddParams {
    a_scale: 1.5,
    c_scale: 2.0,
    relu: true,
    ..ResaddParams::default()
  };
  let ws = run_resadd(&cap, 50, 77, &params, Dataflow::WS, 31).unwrap();
  let cpu = run_resadd(&cap, 50, 77, &params, Dataflow::CPU, 31).unwrap();
  assert!(ws.passed() && cpu.passed(), "{:?} {:?}", ws, cpu);
  assert!(ws.instructions > 0);
  assert_eq!(cpu.instructions, 0);
}

#[test]
fn os_sum_is_rejected() {
  let err = run_resadd(&HardwareCapacity::default(), 16, 16, &ResaddParams::default(), Dataflow::OS, 0).unwrap_err();
  assert!(err.is_configuration());
}
