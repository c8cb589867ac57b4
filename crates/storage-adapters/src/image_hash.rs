//! # Perceptual hashers
//!
//! 64-bit image fingerprints that survive re-encoding, resizing and small
//! edits. Bit order is row-major with the first sample in the most
//! significant bit.

use image::imageops::FilterType;
use image::{DynamicImage, GrayImage};

use domains::{DomainError, HashKind, ImageHasher, PerceptualHash, Result};

fn decode(bytes: &[u8]) -> Result<DynamicImage> {
    image::load_from_memory(bytes).map_err(|err| DomainError::InvalidImage(err.to_string()))
}

fn grayscale(image: &DynamicImage, width: u32, height: u32) -> GrayImage {
    image.resize_exact(width, height, FilterType::Triangle).to_luma8()
}

/// Average hash: 8×8 grayscale, one bit per pixel brighter than the mean.
#[derive(Debug, Clone, Copy, Default)]
pub struct AverageHasher;

impl ImageHasher for AverageHasher {
    fn hash(&self, bytes: &[u8]) -> Result<PerceptualHash> {
        let pixels = grayscale(&decode(bytes)?, 8, 8);
        let total: u32 = pixels.pixels().map(|p| u32::from(p.0[0])).sum();
        let mean = f64::from(total) / 64.0;

        let value = pixels
            .pixels()
            .fold(0u64, |acc, p| (acc << 1) | u64::from(f64::from(p.0[0]) > mean));
        Ok(PerceptualHash::new(value, HashKind::Average))
    }
}

/// Difference hash: 9×8 grayscale, one bit per horizontally adjacent pair
/// where brightness increases to the right.
#[derive(Debug, Clone, Copy, Default)]
pub struct DifferenceHasher;

impl ImageHasher for DifferenceHasher {
    fn hash(&self, bytes: &[u8]) -> Result<PerceptualHash> {
        let pixels = grayscale(&decode(bytes)?, 9, 8);
        let mut value = 0u64;
        for y in 0..8 {
            for x in 0..8 {
                let left = pixels.get_pixel(x, y).0[0];
                let right = pixels.get_pixel(x + 1, y).0[0];
                value = (value << 1) | u64::from(left < right);
            }
        }
        Ok(PerceptualHash::new(value, HashKind::Difference))
    }
}
