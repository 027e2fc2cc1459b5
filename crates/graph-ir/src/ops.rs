// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Operator registry.
//!
//! Each [`OpKind`] knows three things about itself:
//!
//! - its arity and which inputs are auxiliary (mutable) state,
//! - how to infer shapes forwards (inputs → output) and backwards
//!   (data → parameter shapes),
//! - how to compute its output from `f32` inputs with the
//!   [`tensor_core`] kernels.
//!
//! | Graph op name                     | Kind             | Inputs                                  |
//! |-----------------------------------|------------------|-----------------------------------------|
//! | `_copy`, `identity`               | `Identity`       | data                                    |
//! | `Dropout`                         | `Dropout`        | data                                    |
//! | `Flatten`                         | `Flatten`        | data                                    |
//! | `Activation`, `relu`, `sigmoid`…  | `Activation`     | data                                    |
//! | `softmax`, `SoftmaxActivation`    | `Softmax`        | data                                    |
//! | `elemwise_add`, `_Plus`           | `ElemwiseAdd`    | lhs, rhs                                |
//! | `elemwise_mul`, `_Mul`            | `ElemwiseMul`    | lhs, rhs                                |
//! | `FullyConnected`                  | `FullyConnected` | data, weight, bias (unless `no_bias`)   |
//! | `BatchNorm`                       | `BatchNorm`      | data, gamma, beta, moving_mean, moving_var |
//! | `LayerNorm`                       | `LayerNorm`      | data, gamma, beta                       |
//! | `SoftmaxOutput`                   | `SoftmaxOutput`  | data, label                             |

use crate::GraphError;
use std::collections::BTreeMap;
use tensor_core::{
    add, batch_norm_inference, layer_norm, map_unary, matmul, mul, softmax, BatchNormParams,
    Shape, TensorError, Transpose, UnaryOp,
};

/// A parsed operator with its attributes.
#[derive(Debug, Clone, PartialEq)]
pub enum OpKind {
    Identity,
    /// Identity at inference time.
    Dropout,
    Flatten,
    Activation(UnaryOp),
    /// Softmax over the trailing axis.
    Softmax,
    ElemwiseAdd,
    ElemwiseMul,
    FullyConnected {
        num_hidden: usize,
        no_bias: bool,
        flatten: bool,
    },
    BatchNorm {
        eps: f32,
        fix_gamma: bool,
    },
    LayerNorm {
        eps: f32,
    },
    /// Softmax over everything after the batch axis; the label input is
    /// only used for shape inference.
    SoftmaxOutput,
}

impl OpKind {
    /// Builds an operator from its graph name and string attributes.
    pub fn parse(
        node: &str,
        op: &str,
        attrs: &BTreeMap<String, String>,
    ) -> Result<Self, GraphError> {
        let attr = Attrs { node, attrs };
        Ok(match op {
            "_copy" | "identity" => OpKind::Identity,
            "Dropout" => OpKind::Dropout,
            "Flatten" | "flatten" => OpKind::Flatten,
            "relu" => OpKind::Activation(UnaryOp::Relu),
            "sigmoid" => OpKind::Activation(UnaryOp::Sigmoid),
            "tanh" => OpKind::Activation(UnaryOp::Tanh),
            "Activation" => {
                let act = attr.required("act_type")?;
                let kind = match act {
                    "relu" => UnaryOp::Relu,
                    "sigmoid" => UnaryOp::Sigmoid,
                    "tanh" => UnaryOp::Tanh,
                    "softrelu" => UnaryOp::SoftRelu,
                    "gelu" => UnaryOp::Gelu,
                    _ => return Err(attr.invalid("act_type", act)),
                };
                OpKind::Activation(kind)
            }
            "softmax" | "SoftmaxActivation" => {
                if let Some(axis) = attrs.get("axis") {
                    if axis != "-1" {
                        return Err(attr.invalid("axis", axis));
                    }
                }
                OpKind::Softmax
            }
            "elemwise_add" | "_Plus" | "_plus" => OpKind::ElemwiseAdd,
            "elemwise_mul" | "_Mul" | "_mul" => OpKind::ElemwiseMul,
            "FullyConnected" => OpKind::FullyConnected {
                num_hidden: attr.parse_required("num_hidden")?,
                no_bias: attr.flag("no_bias", false)?,
                flatten: attr.flag("flatten", true)?,
            },
            "BatchNorm" => OpKind::BatchNorm {
                eps: attr.parse_or("eps", 1e-3)?,
                fix_gamma: attr.flag("fix_gamma", true)?,
            },
            "LayerNorm" => {
                if let Some(axis) = attrs.get("axis") {
                    if axis != "-1" {
                        return Err(attr.invalid("axis", axis));
                    }
                }
                OpKind::LayerNorm {
                    eps: attr.parse_or("eps", 1e-5)?,
                }
            }
            "SoftmaxOutput" => OpKind::SoftmaxOutput,
            other => {
                return Err(GraphError::UnknownOperator {
                    node: node.to_string(),
                    op: other.to_string(),
                })
            }
        })
    }

    /// Number of inputs the operator consumes.
    pub fn num_inputs(&self) -> usize {
        match self {
            OpKind::Identity
            | OpKind::Dropout
            | OpKind::Flatten
            | OpKind::Activation(_)
            | OpKind::Softmax => 1,
            OpKind::ElemwiseAdd | OpKind::ElemwiseMul | OpKind::SoftmaxOutput => 2,
            OpKind::FullyConnected { no_bias, .. } => {
                if *no_bias {
                    2
                } else {
                    3
                }
            }
            OpKind::BatchNorm { .. } => 5,
            OpKind::LayerNorm { .. } => 3,
        }
    }

    /// Input positions holding auxiliary state rather than arguments.
    pub fn mutable_inputs(&self) -> &'static [usize] {
        match self {
            OpKind::BatchNorm { .. } => &[3, 4],
            _ => &[],
        }
    }

    // ── Shape inference ────────────────────────────────────────────

    /// One inference step. Fills unknown slots from known ones and returns
    /// whether anything changed. Conflicts are errors.
    pub(crate) fn infer(
        &self,
        node: &str,
        inputs: &mut [Option<Shape>],
        output: &mut Option<Shape>,
    ) -> Result<bool, GraphError> {
        let mut changed = false;
        match self {
            OpKind::Identity | OpKind::Dropout | OpKind::Activation(_) | OpKind::Softmax => {
                changed |= unify(node, &mut inputs[0], output)?;
            }
            OpKind::ElemwiseAdd | OpKind::ElemwiseMul => {
                let known = inputs
                    .iter()
                    .chain(std::iter::once(&*output))
                    .find_map(|slot| slot.clone());
                if let Some(shape) = known {
                    for slot in inputs.iter_mut() {
                        changed |= assign(node, slot, &shape)?;
                    }
                    changed |= assign(node, output, &shape)?;
                }
            }
            OpKind::Flatten => {
                if let Some(data) = inputs[0].clone() {
                    let data = require_rank(node, &data, 1)?;
                    changed |= assign(node, output, &data.flatten_2d())?;
                }
            }
            OpKind::FullyConnected {
                num_hidden,
                no_bias,
                flatten,
            } => {
                if let Some(data) = inputs[0].clone() {
                    let dims = require_rank(node, &data, 1)?.dims();
                    let (mut out_dims, k) = if *flatten {
                        (vec![dims[0]], dims[1..].iter().product())
                    } else {
                        let last = dims.len() - 1;
                        (dims[..last].to_vec(), dims[last])
                    };
                    out_dims.push(*num_hidden);
                    changed |= assign(node, &mut inputs[1], &Shape::matrix(*num_hidden, k))?;
                    if !no_bias {
                        changed |= assign(node, &mut inputs[2], &Shape::vector(*num_hidden))?;
                    }
                    changed |= assign(node, output, &Shape::new(out_dims))?;
                }
            }
            OpKind::BatchNorm { .. } => {
                changed |= unify(node, &mut inputs[0], output)?;
                if let Some(data) = inputs[0].clone() {
                    let channels = require_rank(node, &data, 2)?.dims()[1];
                    for slot in &mut inputs[1..5] {
                        changed |= assign(node, slot, &Shape::vector(channels))?;
                    }
                }
            }
            OpKind::LayerNorm { .. } => {
                changed |= unify(node, &mut inputs[0], output)?;
                if let Some(data) = inputs[0].clone() {
                    let dims = require_rank(node, &data, 1)?.dims();
                    let width = dims[dims.len() - 1];
                    for slot in &mut inputs[1..3] {
                        changed |= assign(node, slot, &Shape::vector(width))?;
                    }
                }
            }
            OpKind::SoftmaxOutput => {
                changed |= unify(node, &mut inputs[0], output)?;
                if let Some(data) = inputs[0].clone() {
                    let batch = require_rank(node, &data, 1)?.dims()[0];
                    changed |= assign(node, &mut inputs[1], &Shape::vector(batch))?;
                }
            }
        }
        Ok(changed)
    }

    // ── Execution ──────────────────────────────────────────────────

    /// Computes the output into `out`. `inputs` and `shapes` are aligned
    /// with the operator's inputs.
    pub fn forward(
        &self,
        inputs: &[&[f32]],
        shapes: &[&Shape],
        out: &mut [f32],
    ) -> Result<(), TensorError> {
        match self {
            OpKind::Identity | OpKind::Dropout | OpKind::Flatten => {
                if inputs[0].len() != out.len() {
                    return Err(TensorError::SizeMismatch {
                        op: "copy",
                        expected: out.len(),
                        actual: inputs[0].len(),
                    });
                }
                out.copy_from_slice(inputs[0]);
                Ok(())
            }
            OpKind::Activation(op) => map_unary(*op, inputs[0], out),
            OpKind::Softmax => {
                let axis_len = shapes[0].dims().last().copied().unwrap_or(1);
                softmax(inputs[0], out, axis_len)
            }
            OpKind::SoftmaxOutput => {
                let batch = shapes[0].batch().unwrap_or(1);
                let axis_len = if batch == 0 {
                    0
                } else {
                    shapes[0].num_elements() / batch
                };
                softmax(inputs[0], out, axis_len)
            }
            OpKind::ElemwiseAdd => add(inputs[0], inputs[1], out),
            OpKind::ElemwiseMul => mul(inputs[0], inputs[1], out),
            OpKind::FullyConnected {
                num_hidden,
                no_bias,
                flatten,
            } => {
                let dims = shapes[0].dims();
                let k = if *flatten {
                    dims.iter().skip(1).product()
                } else {
                    dims.last().copied().unwrap_or(1)
                };
                let m = if k == 0 { 0 } else { inputs[0].len() / k };
                matmul(inputs[0], inputs[1], out, m, k, *num_hidden, Transpose::Rhs)?;
                if !no_bias {
                    let bias = inputs[2];
                    if bias.len() != *num_hidden {
                        return Err(TensorError::SizeMismatch {
                            op: "fully_connected bias",
                            expected: *num_hidden,
                            actual: bias.len(),
                        });
                    }
                    for row in out.chunks_exact_mut(*num_hidden) {
                        for (o, b) in row.iter_mut().zip(bias) {
                            *o += b;
                        }
                    }
                }
                Ok(())
            }
            OpKind::BatchNorm { eps, fix_gamma } => {
                let dims = shapes[0].dims();
                let channels = dims.get(1).copied().unwrap_or(1);
                let spatial = dims.iter().skip(2).product();
                let params = BatchNormParams {
                    gamma: inputs[1],
                    beta: inputs[2],
                    moving_mean: inputs[3],
                    moving_var: inputs[4],
                    eps: *eps,
                    fix_gamma: *fix_gamma,
                };
                batch_norm_inference(inputs[0], out, channels, spatial, &params)
            }
            OpKind::LayerNorm { eps } => layer_norm(inputs[0], inputs[1], inputs[2], *eps, out),
        }
    }
}

// ── Helpers ────────────────────────────────────────────────────────

fn assign(node: &str, slot: &mut Option<Shape>, shape: &Shape) -> Result<bool, GraphError> {
    match slot {
        None => {
            *slot = Some(shape.clone());
            Ok(true)
        }
        Some(existing) if existing == shape => Ok(false),
        Some(existing) => Err(GraphError::ShapeMismatch {
            node: node.to_string(),
            expected: existing.clone(),
            actual: shape.clone(),
        }),
    }
}

/// Same-shape constraint between an input and the output, both ways.
fn unify(node: &str, input: &mut Option<Shape>, output: &mut Option<Shape>) -> Result<bool, GraphError> {
    match (input.clone(), output.clone()) {
        (Some(i), _) => assign(node, output, &i),
        (None, Some(o)) => assign(node, input, &o),
        (None, None) => Ok(false),
    }
}

fn require_rank<'s>(node: &str, shape: &'s Shape, min: usize) -> Result<&'s Shape, GraphError> {
    if shape.rank() < min {
        return Err(GraphError::InvalidShape {
            node: node.to_string(),
            detail: format!("expected rank >= {min}, got {shape}"),
        });
    }
    Ok(shape)
}

struct Attrs<'a> {
    node: &'a str,
    attrs: &'a BTreeMap<String, String>,
}

impl Attrs<'_> {
    fn invalid(&self, key: &str, value: &str) -> GraphError {
        GraphError::InvalidAttribute {
            node: self.node.to_string(),
            key: key.to_string(),
            value: value.to_string(),
        }
    }

    fn required(&self, key: &str) -> Result<&str, GraphError> {
        self.attrs
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| self.invalid(key, "<missing>"))
    }

    fn parse_required<T: std::str::FromStr>(&self, key: &str) -> Result<T, GraphError> {
        let raw = self.required(key)?;
        raw.trim().parse().map_err(|_| self.invalid(key, raw))
    }

    fn parse_or<T: std::str::FromStr>(&self, key: &str, default: T) -> Result<T, GraphError> {
        match self.attrs.get(key) {
            Some(raw) => raw.trim().parse().map_err(|_| self.invalid(key, raw)),
            None => Ok(default),
        }
    }

    fn flag(&self, key: &str, default: bool) -> Result<bool, GraphError> {
        match self.attrs.get(key).map(String::as_str) {
            None => Ok(default),
            Some("True" | "true" | "1") => Ok(true),
            Some("False" | "false" | "0") => Ok(false),
            Some(other) => Err(self.invalid(key, other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_fully_connected() {
        let op = OpKind::parse("fc", "FullyConnected", &attrs(&[("num_hidden", "10")])).unwrap();
        assert_eq!(
            op,
            OpKind::FullyConnected {
                num_hidden: 10,
                no_bias: false,
                flatten: true
            }
        );
        assert_eq!(op.num_inputs(), 3);

        let op = OpKind::parse(
            "fc",
            "FullyConnected",
            &attrs(&[("num_hidden", "4"), ("no_bias", "True")]),
        )
        .unwrap();
        assert_eq!(op.num_inputs(), 2);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            OpKind::parse("c", "Convolution", &BTreeMap::new()),
            Err(GraphError::UnknownOperator { .. })
        ));
        assert!(matches!(
            OpKind::parse("fc", "FullyConnected", &BTreeMap::new()),
            Err(GraphError::InvalidAttribute { .. })
        ));
        assert!(matches!(
            OpKind::parse("a", "Activation", &attrs(&[("act_type", "swish")])),
            Err(GraphError::InvalidAttribute { .. })
        ));
        assert!(OpKind::parse("bn", "BatchNorm", &attrs(&[("fix_gamma", "maybe")])).is_err());
    }

    #[test]
    fn test_batch_norm_aux_positions() {
        let op = OpKind::parse("bn", "BatchNorm", &BTreeMap::new()).unwrap();
        assert_eq!(op.mutable_inputs(), &[3, 4]);
        assert_eq!(op.num_inputs(), 5);
    }

    #[test]
    fn test_fc_infers_weight_and_bias() {
        let op = OpKind::FullyConnected {
            num_hidden: 8,
            no_bias: false,
            flatten: true,
        };
        let mut inputs = vec![Some(Shape::from([2, 3, 4])), None, None];
        let mut out = None;
        assert!(op.infer("fc", &mut inputs, &mut out).unwrap());
        assert_eq!(inputs[1], Some(Shape::from([8, 12])));
        assert_eq!(inputs[2], Some(Shape::from([8])));
        assert_eq!(out, Some(Shape::from([2, 8])));
        // Second pass is a no-op.
        assert!(!op.infer("fc", &mut inputs, &mut out).unwrap());
    }

    #[test]
    fn test_fc_without_flatten_keeps_leading_dims() {
        let op = OpKind::FullyConnected {
            num_hidden: 5,
            no_bias: true,
            flatten: false,
        };
        let mut inputs = vec![Some(Shape::from([2, 3, 4])), None];
        let mut out = None;
        op.infer("fc", &mut inputs, &mut out).unwrap();
        assert_eq!(inputs[1], Some(Shape::from([5, 4])));
        assert_eq!(out, Some(Shape::from([2, 3, 5])));
    }

    #[test]
    fn test_conflicting_weight_shape() {
        let op = OpKind::FullyConnected {
            num_hidden: 8,
            no_bias: true,
            flatten: true,
        };
        let mut inputs = vec![Some(Shape::from([2, 3])), Some(Shape::from([8, 4]))];
        let mut out = None;
        assert!(matches!(
            op.infer("fc", &mut inputs, &mut out),
            Err(GraphError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_identity_infers_backwards() {
        let mut inputs = vec![None];
        let mut out = Some(Shape::from([4]));
        OpKind::Identity.infer("id", &mut inputs, &mut out).unwrap();
        assert_eq!(inputs[0], Some(Shape::from([4])));
    }

    #[test]
    fn test_batch_norm_needs_channel_axis() {
        let op = OpKind::BatchNorm {
            eps: 1e-3,
            fix_gamma: true,
        };
        let mut inputs = vec![Some(Shape::from([4])), None, None, None, None];
        let mut out = None;
        assert!(matches!(
            op.infer("bn", &mut inputs, &mut out),
            Err(GraphError::InvalidShape { .. })
        ));
    }

    #[test]
    fn test_fc_forward_adds_bias() {
        let op = OpKind::FullyConnected {
            num_hidden: 2,
            no_bias: false,
            flatten: true,
        };
        let data = [1.0, 2.0];
        let weight = [1.0, 0.0, 0.0, 1.0];
        let bias = [10.0, 20.0];
        let shape = Shape::from([1, 2]);
        let wshape = Shape::from([2, 2]);
        let bshape = Shape::from([2]);
        let mut out = [0.0; 2];
        op.forward(&[&data, &weight, &bias], &[&shape, &wshape, &bshape], &mut out)
            .unwrap();
        assert_eq!(out, [11.0, 22.0]);
    }

    #[test]
    fn test_softmax_output_normalises_per_sample() {
        let data = [0.0; 6];
        let label = [0.0; 2];
        let shape = Shape::from([2, 3]);
        let lshape = Shape::from([2]);
        let mut out = [0.0; 6];
        OpKind::SoftmaxOutput
            .forward(&[&data, &label], &[&shape, &lshape], &mut out)
            .unwrap();
        assert!(out.iter().all(|v| (v - 1.0 / 3.0).abs() < 1e-6));
    }
}
