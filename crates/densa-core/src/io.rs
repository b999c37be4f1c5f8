//! Binary tensor format
//!
//! ```text
//! dim_0 .. dim_{k-1}   little-endian u32 each, most significant dimension last
//! values               rows*columns*... little-endian f32 in storage order
//! ```
//!
//! There is no header: the reader decides how many dimensions to read from
//! the tensor type it asks for. Round trips are bit-exact.

use std::io::{self, Read, Write};

use crate::context::{element_count, TensorContext};
use crate::error::Result;
use crate::segment::{Scalar, Segment};
use crate::tensor::{Matrix, ShapedTensor, Tensor3D, Tensor4D, Vector};

/// Write the shape and elements of any tensor
pub fn write_tensor<T, W>(tensor: &T, writer: &mut W) -> Result<()>
where
    T: ShapedTensor,
    W: Write,
{
    for dim in tensor.shape_vec() {
        let dim = u32::try_from(dim).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("dimension {dim} does not fit in u32"),
            )
        })?;
        writer.write_all(&dim.to_le_bytes())?;
    }
    write_values(tensor.segment(), writer)
}

fn write_values<W: Write>(segment: &Segment, writer: &mut W) -> Result<()> {
    let values = segment.borrow_contiguous()?;
    if cfg!(target_endian = "little") {
        writer.write_all(bytemuck::cast_slice::<Scalar, u8>(&values))?;
    } else {
        for value in values.iter() {
            writer.write_all(&value.to_le_bytes())?;
        }
    }
    Ok(())
}

fn read_dims<R: Read, const N: usize>(reader: &mut R) -> Result<[usize; N]> {
    let mut dims = [0usize; N];
    let mut word = [0u8; 4];
    for dim in dims.iter_mut() {
        reader.read_exact(&mut word)?;
        *dim = u32::from_le_bytes(word) as usize;
    }
    Ok(dims)
}

fn read_values<R: Read>(
    context: &TensorContext,
    reader: &mut R,
    dims: &[usize],
) -> Result<Segment> {
    let byte_len = element_count(dims)
        .and_then(|count| count.checked_mul(std::mem::size_of::<Scalar>()))
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("shape {dims:?} does not fit in memory"),
            )
        })?;

    // Grows with the data actually present, not with the declared shape
    let mut bytes = Vec::new();
    reader.by_ref().take(byte_len as u64).read_to_end(&mut bytes)?;
    if bytes.len() != byte_len {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("shape {dims:?} needs {byte_len} bytes, found {}", bytes.len()),
        )
        .into());
    }

    let segment = context.create_segment(byte_len / std::mem::size_of::<Scalar>(), false);
    segment.with_contiguous_mut(|buffer| {
        for (value, word) in buffer.iter_mut().zip(bytes.chunks_exact(4)) {
            *value = Scalar::from_le_bytes([word[0], word[1], word[2], word[3]]);
        }
    })?;
    Ok(segment)
}

pub fn read_vector<R: Read>(context: &TensorContext, reader: &mut R) -> Result<Vector> {
    let dims = read_dims::<_, 1>(reader)?;
    let segment = read_values(context, reader, &dims)?;
    Ok(context.create_vector_from_segment(segment))
}

pub fn read_matrix<R: Read>(context: &TensorContext, reader: &mut R) -> Result<Matrix> {
    let dims @ [rows, columns] = read_dims::<_, 2>(reader)?;
    let segment = read_values(context, reader, &dims)?;
    context.create_matrix_from_segment(segment, rows, columns)
}

pub fn read_tensor3d<R: Read>(context: &TensorContext, reader: &mut R) -> Result<Tensor3D> {
    let dims @ [rows, columns, depth] = read_dims::<_, 3>(reader)?;
    let segment = read_values(context, reader, &dims)?;
    context.create_tensor3d_from_segment(segment, rows, columns, depth)
}

pub fn read_tensor4d<R: Read>(context: &TensorContext, reader: &mut R) -> Result<Tensor4D> {
    let dims @ [rows, columns, depth, count] = read_dims::<_, 4>(reader)?;
    let segment = read_values(context, reader, &dims)?;
    context.create_tensor4d_from_segment(segment, rows, columns, depth, count)
}
