//! Fundamental types shared by the model and its collaborators.

use serde::{Deserialize, Serialize};

/// Side length of the square face crops the H128 model works on
pub const FACE_RESOLUTION: usize = 128;

/// Channels of a color face crop
pub const COLOR_CHANNELS: usize = 3;

/// Channels of a foreground mask
pub const MASK_CHANNELS: usize = 1;

/// Channels of a converter face: color plus appended mask
pub const FACE_WITH_MASK_CHANNELS: usize = COLOR_CHANNELS + MASK_CHANNELS;

/// One of the two face identities being modeled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Domain {
    /// The identity that is swapped in
    Src,
    /// The identity whose footage is being converted
    Dst,
}

impl Domain {
    pub const ALL: [Domain; 2] = [Domain::Src, Domain::Dst];

    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Src => "src",
            Domain::Dst => "dst",
        }
    }
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Face alignment crop used by the sample generator and the compositing pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FaceType {
    /// Tight crop around eyes, nose and mouth
    Half,
    /// Crop covering the whole face
    Full,
}

impl FaceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FaceType::Half => "half_face",
            FaceType::Full => "full_face",
        }
    }
}

/// Accelerator flavor reported alongside the capacity value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    /// Dedicated accelerator memory; batch size follows the capacity table
    #[default]
    Accelerator,
    /// No accelerator; batch size is pinned to the table minimum
    CpuOnly,
}

/// Device the tensors live on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    #[default]
    Cpu,
    Cuda(usize),
    Metal,
}

impl DeviceType {
    pub fn to_device(self) -> candle_core::Result<candle_core::Device> {
        match self {
            DeviceType::Cpu => Ok(candle_core::Device::Cpu),
            DeviceType::Cuda(ordinal) => candle_core::Device::new_cuda(ordinal),
            DeviceType::Metal => candle_core::Device::new_metal(0),
        }
    }
}
