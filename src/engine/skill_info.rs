use std::fmt;

use image::ColorType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgb8,
    Rgba8,
    Luma8,
}

impl PixelFormat {
    pub fn from_color_type(color: ColorType) -> Option<Self> {
        match color {
            ColorType::Rgb8 => Some(PixelFormat::Rgb8),
            ColorType::Rgba8 => Some(PixelFormat::Rgba8),
            ColorType::L8 => Some(PixelFormat::Luma8),
            _ => None,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PixelFormat::Rgb8 => "Rgb8",
            PixelFormat::Rgba8 => "Rgba8",
            PixelFormat::Luma8 => "Luma8",
        };
        f.write_str(label)
    }
}

/// Shape of the image input an engine binds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputDescriptor {
    pub name: String,
    pub description: String,
    pub min_width: u32,
    pub min_height: u32,
    pub supported_formats: Vec<PixelFormat>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkillVersion {
    pub major: u16,
    pub minor: u16,
    pub author: String,
    pub publisher: String,
}

/// Static description of a skill, independent of the device it runs on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkillInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    pub version: SkillVersion,
    pub input: InputDescriptor,
}

impl fmt::Display for SkillInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let formats = self
            .input
            .supported_formats
            .iter()
            .map(|format| format.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        writeln!(f, "{}", self.name)?;
        writeln!(f, "{}", self.description)?;
        writeln!(f, "\tauthored by: {}", self.version.author)?;
        writeln!(f, "\tpublished by: {}", self.version.publisher)?;
        writeln!(f, "\tversion: {}.{}", self.version.major, self.version.minor)?;
        writeln!(f, "\tunique ID: {}", self.id)?;
        writeln!(f, "input: {} ({})", self.input.name, self.input.description)?;
        writeln!(
            f,
            "\tminimum size: {}x{}",
            self.input.min_width, self.input.min_height
        )?;
        write!(f, "\tsupported pixel formats: {}", formats)
    }
}
