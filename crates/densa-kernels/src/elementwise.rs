//! Elementwise operations
//!
//! Unary and binary operations are plain `Copy` enums so a provider can
//! dispatch them through one parallel loop. Derivatives are evaluated at the
//! raw input `x`, not at the activation output.

use densa_core::Scalar;

/// Slope of leaky ReLU for negative inputs
pub const LEAKY_RELU_SLOPE: Scalar = 0.01;

/// Element-wise operations on a single operand
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnaryOp {
    /// Square root: sqrt(x)
    Sqrt,
    /// Natural logarithm: ln(x)
    Log,
    /// Exponential: e^x
    Exp,
    /// Absolute value: |x|
    Abs,
    /// Square: x^2
    Squared,
    /// Power: x^p
    Pow(Scalar),
    /// Sigmoid: 1 / (1 + e^(-x))
    Sigmoid,
    /// sigmoid(x) * (1 - sigmoid(x))
    SigmoidDerivative,
    /// Hyperbolic tangent: tanh(x)
    Tanh,
    /// 1 - tanh(x)^2
    TanhDerivative,
    /// Rectified Linear Unit: max(0, x)
    Relu,
    /// 0 for x <= 0, else 1
    ReluDerivative,
    /// x for x > 0, else 0.01 * x
    LeakyRelu,
    /// 0.01 for x <= 0, else 1
    LeakyReluDerivative,
    /// Clamp into `[min, max]`
    Constrain { min: Scalar, max: Scalar },
    /// `upper` when x is at or above the midpoint of `[lower, upper]`, else `lower`
    Round { lower: Scalar, upper: Scalar },
    /// x + s
    AddScalar(Scalar),
    /// x * s
    MultiplyScalar(Scalar),
}

impl UnaryOp {
    #[inline]
    pub fn apply(self, x: Scalar) -> Scalar {
        match self {
            UnaryOp::Sqrt => x.sqrt(),
            UnaryOp::Log => x.ln(),
            UnaryOp::Exp => x.exp(),
            UnaryOp::Abs => x.abs(),
            UnaryOp::Squared => x * x,
            UnaryOp::Pow(p) => x.powf(p),
            UnaryOp::Sigmoid => sigmoid(x),
            UnaryOp::SigmoidDerivative => {
                let s = sigmoid(x);
                s * (1.0 - s)
            }
            UnaryOp::Tanh => x.tanh(),
            UnaryOp::TanhDerivative => {
                let t = x.tanh();
                1.0 - t * t
            }
            UnaryOp::Relu => {
                if x <= 0.0 {
                    0.0
                } else {
                    x
                }
            }
            UnaryOp::ReluDerivative => {
                if x <= 0.0 {
                    0.0
                } else {
                    1.0
                }
            }
            UnaryOp::LeakyRelu => {
                if x <= 0.0 {
                    LEAKY_RELU_SLOPE * x
                } else {
                    x
                }
            }
            UnaryOp::LeakyReluDerivative => {
                if x <= 0.0 {
                    LEAKY_RELU_SLOPE
                } else {
                    1.0
                }
            }
            UnaryOp::Constrain { min, max } => x.max(min).min(max),
            UnaryOp::Round { lower, upper } => {
                if x >= lower + (upper - lower) / 2.0 {
                    upper
                } else {
                    lower
                }
            }
            UnaryOp::AddScalar(s) => x + s,
            UnaryOp::MultiplyScalar(s) => x * s,
        }
    }

    /// Short name used in log events
    pub fn name(self) -> &'static str {
        match self {
            UnaryOp::Sqrt => "sqrt",
            UnaryOp::Log => "log",
            UnaryOp::Exp => "exp",
            UnaryOp::Abs => "abs",
            UnaryOp::Squared => "squared",
            UnaryOp::Pow(_) => "pow",
            UnaryOp::Sigmoid => "sigmoid",
            UnaryOp::SigmoidDerivative => "sigmoid_derivative",
            UnaryOp::Tanh => "tanh",
            UnaryOp::TanhDerivative => "tanh_derivative",
            UnaryOp::Relu => "relu",
            UnaryOp::ReluDerivative => "relu_derivative",
            UnaryOp::LeakyRelu => "leaky_relu",
            UnaryOp::LeakyReluDerivative => "leaky_relu_derivative",
            UnaryOp::Constrain { .. } => "constrain",
            UnaryOp::Round { .. } => "round",
            UnaryOp::AddScalar(_) => "add_scalar",
            UnaryOp::MultiplyScalar(_) => "multiply_scalar",
        }
    }
}

/// Element-wise operations on two equally shaped operands
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BinaryOp {
    /// a + b
    Add,
    /// a - b
    Subtract,
    /// a * b
    Multiply,
    /// a / b
    Divide,
    /// a * a_coefficient + b * b_coefficient
    AddWeighted {
        a_coefficient: Scalar,
        b_coefficient: Scalar,
    },
}

impl BinaryOp {
    #[inline]
    pub fn apply(self, a: Scalar, b: Scalar) -> Scalar {
        match self {
            BinaryOp::Add => a + b,
            BinaryOp::Subtract => a - b,
            BinaryOp::Multiply => a * b,
            BinaryOp::Divide => a / b,
            BinaryOp::AddWeighted {
                a_coefficient,
                b_coefficient,
            } => a * a_coefficient + b * b_coefficient,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Subtract => "subtract",
            BinaryOp::Multiply => "pointwise_multiply",
            BinaryOp::Divide => "pointwise_divide",
            BinaryOp::AddWeighted { .. } => "add_weighted",
        }
    }
}

#[inline]
fn sigmoid(x: Scalar) -> Scalar {
    1.0 / (1.0 + (-x).exp())
}

/// Numerically stable softmax of `input` into `output`
pub fn softmax_into(input: &[Scalar], output: &mut [Scalar]) {
    debug_assert_eq!(input.len(), output.len());
    let max = input.iter().copied().fold(Scalar::NEG_INFINITY, Scalar::max);

    let mut total = 0.0;
    for (out, &x) in output.iter_mut().zip(input) {
        *out = (x - max).exp();
        total += *out;
    }
    if total > 0.0 {
        for out in output.iter_mut() {
            *out /= total;
        }
    }
}

/// Jacobian of softmax from its output `s`: `J[i, j] = s_i * (δ_ij - s_j)`.
///
/// `output` is the `n x n` column-major matrix.
pub fn softmax_jacobian_into(softmax: &[Scalar], output: &mut [Scalar]) {
    let n = softmax.len();
    debug_assert_eq!(output.len(), n * n);
    for (j, column) in output.chunks_mut(n.max(1)).enumerate().take(n) {
        let s_j = softmax[j];
        for (i, out) in column.iter_mut().enumerate() {
            let s_i = softmax[i];
            *out = if i == j { s_i * (1.0 - s_i) } else { -s_i * s_j };
        }
    }
}
