//! Image-processing step.
//!
//! Validates the generated payload is a real PNG and extracts its pixel
//! dimensions from the IHDR chunk. The single-size strategy keeps one
//! rendition serving both the preview and print roles; this step is where a
//! future resize/vectorize pass would slot in.

use serde_json::json;
use tracing::debug;

use crate::context::StepContext;
use crate::error::StepError;

const PNG_SIGNATURE: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

/// Byte length of signature + IHDR length/type fields preceding the
/// dimension words.
const IHDR_DIMS_OFFSET: usize = 16;

/// Parse width/height out of a PNG's IHDR chunk.
fn png_dimensions(bytes: &[u8]) -> Result<(u32, u32), StepError> {
    if bytes.len() < IHDR_DIMS_OFFSET + 8 {
        return Err(StepError::InvalidImage("truncated PNG".to_string()));
    }
    if bytes[..8] != PNG_SIGNATURE {
        return Err(StepError::InvalidImage("missing PNG signature".to_string()));
    }
    if &bytes[12..16] != b"IHDR" {
        return Err(StepError::InvalidImage("first chunk is not IHDR".to_string()));
    }

    let width = u32::from_be_bytes(bytes[16..20].try_into().expect("slice length checked"));
    let height = u32::from_be_bytes(bytes[20..24].try_into().expect("slice length checked"));
    if width == 0 || height == 0 {
        return Err(StepError::InvalidImage(format!("degenerate dimensions {width}x{height}")));
    }
    Ok((width, height))
}

pub async fn run(ctx: &mut StepContext<'_>) -> Result<serde_json::Value, StepError> {
    let bytes = ctx
        .image_bytes
        .as_ref()
        .ok_or_else(|| StepError::InvalidImage("no image bytes in context".to_string()))?;

    let (width, height) = png_dimensions(bytes)?;
    debug!(item_id = %ctx.item.id, width, height, size = bytes.len(), "image processed");

    ctx.image_dims = Some((width, height));
    Ok(json!({"width": width, "height": height, "size": bytes.len()}))
}
