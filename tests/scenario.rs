use gemtile::log::init_log;
use gemtile::tiling::GrowthPolicy;
use gemtile::workload::run_conv;
use gemtile::{ConvParams, ConvShape, Dataflow, HardwareCapacity, Pool};

const POOL_3_2_1: Pool = Pool {
  size: 3,
  stride: 2,
  padding: 1,
};

/// RGB stem: 3 input channels, 32 filters, 3x3 kernel, stride 2, padding 1.
fn stem(batch: usize, in_dim: usize, pool: bool) {
  init_log();
  let cap = HardwareCapacity::default();
  let shape = ConvShape::new(batch, in_dim, 3, 32, 2, 1, 3);
  assert_eq!(shape.out_dim, in_dim / 2);
  let params = ConvParams {
    pool: pool.then_some(POOL_3_2_1),
    ..ConvParams::default()
  };

  let report = run_conv(&cap, &shape, &params, Dataflow::WS, true, 2024).unwrap();
  assert_eq!(report.plan.policy, GrowthPolicy::FirstLayer);
  let pod = params.pool_out_dim(shape.out_dim);
  assert_eq!(report.elements, batch * pod * pod * 32);
  assert!(report.passed(), "{:?}", report);
}

#[test]
fn reduced_stem() {
  stem(1, 56, false);
}

#[test]
fn reduced_stem_pooled() {
  stem(2, 32, true);
}

#[cfg(feature = "full-scale-tests")]
#[test]
fn full_stem() {
  stem(4, 224, false);
}

#[cfg(feature = "full-scale-tests")]
#[test]
fn full_stem_pooled() {
  stem(4, 224, true);
}
