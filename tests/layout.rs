use gemtile::log::init_log;
use gemtile::reference::{conv_cpu, matmul_cpu};
use gemtile::workload::TensorGen;
use gemtile::{
  tiled_conv_auto, tiled_matmul_auto, ConvOperands, ConvParams, ConvShape, Dataflow, Gemmini, HardwareCapacity,
  MatmulDims, MatmulOperands, MatmulParams, Pool,
};

const CANARY: i8 = 0x55;
const TAIL: usize = 256;

/// Column gaps between the sub-block and the rest of each row of its parent buffer.
struct Gaps {
  a: usize,
  b: usize,
  d: usize,
  c: usize,
}

/// Multiply sub-blocks of larger row-major buffers and check the output lands inside its
/// extent only: every gap byte between rows and every byte after the last row keeps the canary.
fn run_sub_block(dims: MatmulDims, gaps: &Gaps, dataflow: Dataflow, seed: u64) {
  let cap = HardwareCapacity::default();
  let params = MatmulParams::default();
  let (stride_a, stride_b, stride_d, stride_c) = (dims.k + gaps.a, dims.j + gaps.b, dims.j + gaps.d, dims.j + gaps.c);

  let mut gen = TensorGen::new(seed);
  let a = gen.i8_tensor(dims.i * stride_a);
  let b = gen.i8_tensor(dims.k * stride_b);
  let d = gen.i32_tensor(dims.i * stride_d);

  let mut gemmini = Gemmini::new(cap);
  let c_len = dims.i * stride_c + TAIL;
  let operands = MatmulOperands {
    a: gemmini.dram.alloc_i8(&a),
    b: gemmini.dram.alloc_i8(&b),
    d: Some(gemmini.dram.alloc_i32(&d)),
    c: Some(gemmini.dram.alloc_i8(&vec![CANARY; c_len])),
    stride_a,
    stride_b,
    stride_d,
    stride_c,
  };
  tiled_matmul_auto(&mut gemmini, &cap, dims, &operands, &params, dataflow).unwrap();

  let expected = matmul_cpu(dims, &a, stride_a, &b, stride_b, Some((&d, stride_d)), &params);
  let c = gemmini.dram.read_i8_vec(operands.c.unwrap(), c_len);
  for row in 0..dims.i {
    for col in 0..stride_c {
      let actual = c[row * stride_c + col];
      if col < dims.j {
        assert_eq!(actual, expected[row * dims.j + col], "{:?} under {:?} at ({}, {})", dims, dataflow, row, col);
      } else {
        assert_eq!(actual, CANARY, "{:?} under {:?} wrote gap ({}, {})", dims, dataflow, row, col);
      }
    }
  }
  let tail = &c[dims.i * stride_c..];
  assert!(tail.iter().all(|&x| x == CANARY), "{:?} under {:?} wrote past the last row", dims, dataflow);
}

#[test]
fn strided_sub_blocks_stay_in_extent() {
  init_log();
  let cases = [
    (MatmulDims::new(37, 21, 45), Gaps { a: 19, b: 11, d: 3, c: 27 }),
    (MatmulDims::new(20, 33, 17), Gaps { a: 1, b: 31, d: 16, c: 15 }),
    (MatmulDims::new(5, 7, 9), Gaps { a: 7, b: 25, d: 9, c: 40 }),
  ];
  for (n, (dims, gaps)) in cases.iter().enumerate() {
    for dataflow in [Dataflow::OS, Dataflow::WS, Dataflow::CPU] {
      run_sub_block(*dims, gaps, dataflow, n as u64 + 1);
    }
  }
}

/// Run a convolution into an output buffer with a canary tail and check the tail survives.
fn run_with_tail(shape: &ConvShape, params: &ConvParams, seed: u64) {
  let cap = HardwareCapacity::default();
  let mut gen = TensorGen::new(seed);
  let input = gen.i8_tensor(shape.input_len());
  let weights = gen.i8_tensor(shape.weight_len());
  let bias = gen.i32_tensor(shape.out_channels);

  let mut gemmini = Gemmini::new(cap);
  let output_len = shape.output_len(params);
  let operands = ConvOperands {
    input: gemmini.dram.alloc_i8(&input),
    weights: gemmini.dram.alloc_i8(&weights),
    bias: Some(gemmini.dram.alloc_i32(&bias)),
    output: gemmini.dram.alloc_i8(&vec![CANARY; output_len + TAIL]),
  };
  tiled_conv_auto(&mut gemmini, &cap, shape, params, &operands, Dataflow::WS).unwrap();

  let out = gemmini.dram.read_i8_vec(operands.output, output_len + TAIL);
  assert_eq!(&out[..output_len], conv_cpu(shape, &input, &weights, Some(&bias), params).as_slice());
  assert!(out[output_len..].iter().all(|&x| x == CANARY), "{:?} wrote past its output", shape);
}

#[test]
fn conv_output_tail_is_untouched() {
  init_log();
  run_with_tail(&ConvShape::new(2, 13, 19, 35, 1, 1, 3), &ConvParams::default(), 3);
  run_with_tail(&ConvShape::new(1, 17, 3, 20, 2, 1, 3), &ConvParams::default(), 4);
}

#[test]
fn pooled_conv_output_tail_is_untouched() {
  init_log();
  let params = ConvParams {
    pool: Some(Pool {
      size: 3,
      stride: 2,
      padding: 1,
    }),
    ..ConvParams::default()
  };
  run_with_tail(&ConvShape::new(2, 14, 16, 20, 1, 1, 3), &params, 5);
  run_with_tail(&ConvShape::new(1, 20, 12, 18, 1, 1, 3), &params, 6);
}
