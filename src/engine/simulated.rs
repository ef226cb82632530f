use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use tracing::debug;

use crate::common::{ExecutionDeviceDescriptor, ExecutionDeviceKind, Frame};
use crate::engine::{
    AnalysisEngine, EngineFactory, InputDescriptor, Joint, JointLabel, Limb, PixelFormat,
    SkeletalBody, SkillInfo, SkillVersion,
};
use crate::error::EngineError;

const ANALYSIS_RESOLUTION: u32 = 64;
const BRIGHTNESS_THRESHOLD: u8 = 200;

// Unit-box pose stretched over the detected region.
const POSE: [(JointLabel, f32, f32); 14] = [
    (JointLabel::Head, 0.50, 0.05),
    (JointLabel::Neck, 0.50, 0.18),
    (JointLabel::RightShoulder, 0.35, 0.20),
    (JointLabel::RightElbow, 0.28, 0.38),
    (JointLabel::RightWrist, 0.25, 0.55),
    (JointLabel::LeftShoulder, 0.65, 0.20),
    (JointLabel::LeftElbow, 0.72, 0.38),
    (JointLabel::LeftWrist, 0.75, 0.55),
    (JointLabel::RightHip, 0.42, 0.55),
    (JointLabel::RightKnee, 0.40, 0.75),
    (JointLabel::RightAnkle, 0.40, 0.95),
    (JointLabel::LeftHip, 0.58, 0.55),
    (JointLabel::LeftKnee, 0.60, 0.75),
    (JointLabel::LeftAnkle, 0.60, 0.95),
];

const LIMBS: [(JointLabel, JointLabel); 13] = [
    (JointLabel::Head, JointLabel::Neck),
    (JointLabel::Neck, JointLabel::RightShoulder),
    (JointLabel::RightShoulder, JointLabel::RightElbow),
    (JointLabel::RightElbow, JointLabel::RightWrist),
    (JointLabel::Neck, JointLabel::LeftShoulder),
    (JointLabel::LeftShoulder, JointLabel::LeftElbow),
    (JointLabel::LeftElbow, JointLabel::LeftWrist),
    (JointLabel::Neck, JointLabel::RightHip),
    (JointLabel::RightHip, JointLabel::RightKnee),
    (JointLabel::RightKnee, JointLabel::RightAnkle),
    (JointLabel::Neck, JointLabel::LeftHip),
    (JointLabel::LeftHip, JointLabel::LeftKnee),
    (JointLabel::LeftKnee, JointLabel::LeftAnkle),
];

/// Device catalogue shared by the factory and every engine it builds, so a
/// device can be taken offline while an engine is running on it.
#[derive(Clone, Debug)]
pub struct SimulatedDevices {
    devices: Arc<RwLock<IndexMap<ExecutionDeviceDescriptor, bool>>>,
}

impl SimulatedDevices {
    pub fn new(devices: impl IntoIterator<Item = ExecutionDeviceDescriptor>) -> Self {
        let devices = devices.into_iter().map(|device| (device, true)).collect();
        Self {
            devices: Arc::new(RwLock::new(devices)),
        }
    }

    pub fn set_online(&self, device: &ExecutionDeviceDescriptor, online: bool) {
        if let Ok(mut devices) = self.devices.write() {
            if let Some(state) = devices.get_mut(device) {
                *state = online;
            }
        }
    }

    pub fn is_online(&self, device: &ExecutionDeviceDescriptor) -> bool {
        self.devices
            .read()
            .map(|devices| devices.get(device).copied().unwrap_or(false))
            .unwrap_or(false)
    }

    pub fn online(&self) -> Vec<ExecutionDeviceDescriptor> {
        self.devices
            .read()
            .map(|devices| {
                devices
                    .iter()
                    .filter(|(_, online)| **online)
                    .map(|(device, _)| device.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Default for SimulatedDevices {
    fn default() -> Self {
        Self::new([
            ExecutionDeviceDescriptor::new(ExecutionDeviceKind::Cpu, "Host CPU"),
            ExecutionDeviceDescriptor::new(ExecutionDeviceKind::Gpu, "Simulated GPU 0"),
        ])
    }
}

/// Factory for [`SimulatedSkeletalDetector`] engines.
pub struct SimulatedSkillFactory {
    devices: SimulatedDevices,
    bind_latency: Duration,
    eval_latency: Duration,
}

impl SimulatedSkillFactory {
    pub fn new(devices: SimulatedDevices) -> Self {
        Self {
            devices,
            bind_latency: Duration::ZERO,
            eval_latency: Duration::ZERO,
        }
    }

    pub fn with_latency(mut self, bind: Duration, evaluate: Duration) -> Self {
        self.bind_latency = bind;
        self.eval_latency = evaluate;
        self
    }

    pub fn devices(&self) -> &SimulatedDevices {
        &self.devices
    }
}

#[async_trait]
impl EngineFactory for SimulatedSkillFactory {
    fn skill_info(&self) -> SkillInfo {
        SkillInfo {
            id: "9b1c5d2e-skeletal-detector-sim".to_string(),
            name: "Simulated Skeletal Detector".to_string(),
            description: "Finds the brightest region of a frame and fits a body pose to it"
                .to_string(),
            version: SkillVersion {
                major: 0,
                minor: 1,
                author: "skill-pipeline".to_string(),
                publisher: "skill-pipeline".to_string(),
            },
            input: InputDescriptor {
                name: "InputImage".to_string(),
                description: "the input image to detect bodies in".to_string(),
                min_width: 8,
                min_height: 8,
                supported_formats: vec![PixelFormat::Rgb8, PixelFormat::Rgba8, PixelFormat::Luma8],
            },
        }
    }

    async fn list_execution_devices(&self) -> Vec<ExecutionDeviceDescriptor> {
        self.devices.online()
    }

    async fn create(
        &self,
        device: Option<&ExecutionDeviceDescriptor>,
    ) -> Result<Box<dyn AnalysisEngine>, EngineError> {
        let device = match device {
            Some(device) if self.devices.is_online(device) => device.clone(),
            Some(device) => return Err(EngineError::DeviceUnavailable(device.to_string())),
            None => self
                .devices
                .online()
                .into_iter()
                .next()
                .ok_or_else(|| EngineError::DeviceUnavailable("default".to_string()))?,
        };
        debug!("Creating simulated skeletal detector on {}", device);
        Ok(Box::new(SimulatedSkeletalDetector {
            device,
            devices: self.devices.clone(),
            input: self.skill_info().input,
            bound: None,
            bind_latency: self.bind_latency,
            eval_latency: self.eval_latency,
        }))
    }
}

pub struct SimulatedSkeletalDetector {
    device: ExecutionDeviceDescriptor,
    devices: SimulatedDevices,
    input: InputDescriptor,
    bound: Option<Frame>,
    bind_latency: Duration,
    eval_latency: Duration,
}

impl SimulatedSkeletalDetector {
    fn ensure_device(&self) -> Result<(), EngineError> {
        if self.devices.is_online(&self.device) {
            Ok(())
        } else {
            Err(EngineError::Evaluation(format!(
                "execution device {} disconnected",
                self.device
            )))
        }
    }
}

#[async_trait]
impl AnalysisEngine for SimulatedSkeletalDetector {
    fn device(&self) -> &ExecutionDeviceDescriptor {
        &self.device
    }

    async fn bind(&mut self, frame: &Frame) -> Result<(), EngineError> {
        let format = PixelFormat::from_color_type(frame.image().color())
            .filter(|format| self.input.supported_formats.contains(format));
        if format.is_none() {
            return Err(EngineError::Bind {
                frame_id: frame.frame_id(),
                reason: format!("unsupported pixel format {:?}", frame.image().color()),
            });
        }
        if frame.width() < self.input.min_width || frame.height() < self.input.min_height {
            return Err(EngineError::Bind {
                frame_id: frame.frame_id(),
                reason: format!(
                    "frame is {}x{}, expected at least {}x{}",
                    frame.width(),
                    frame.height(),
                    self.input.min_width,
                    self.input.min_height
                ),
            });
        }

        if !self.bind_latency.is_zero() {
            tokio::time::sleep(self.bind_latency).await;
        }
        self.bound = Some(frame.clone());
        Ok(())
    }

    async fn evaluate(&mut self) -> Result<Vec<SkeletalBody>, EngineError> {
        self.ensure_device()?;
        let frame = self
            .bound
            .clone()
            .ok_or_else(|| EngineError::Evaluation("no input bound".to_string()))?;
        // pixel scan stays off the async workers
        let bodies = tokio::task::spawn_blocking(move || detect_bodies(&frame))
            .await
            .map_err(|e| EngineError::Evaluation(format!("detection task failed: {}", e)))?;

        if !self.eval_latency.is_zero() {
            tokio::time::sleep(self.eval_latency).await;
        }
        self.ensure_device()?;
        Ok(bodies)
    }
}

fn detect_bodies(frame: &Frame) -> Vec<SkeletalBody> {
    let luma = frame
        .image()
        .thumbnail(ANALYSIS_RESOLUTION, ANALYSIS_RESOLUTION)
        .to_luma8();
    let (width, height) = luma.dimensions();

    let mut bounds: Option<(u32, u32, u32, u32)> = None;
    for (x, y, pixel) in luma.enumerate_pixels() {
        if pixel.0[0] < BRIGHTNESS_THRESHOLD {
            continue;
        }
        bounds = Some(match bounds {
            None => (x, y, x, y),
            Some((min_x, min_y, max_x, max_y)) => {
                (min_x.min(x), min_y.min(y), max_x.max(x), max_y.max(y))
            }
        });
    }

    let Some((min_x, min_y, max_x, max_y)) = bounds else {
        return Vec::new();
    };
    let left = min_x as f32 / width as f32;
    let top = min_y as f32 / height as f32;
    let box_width = (max_x + 1 - min_x) as f32 / width as f32;
    let box_height = (max_y + 1 - min_y) as f32 / height as f32;

    let joint = |label: JointLabel| {
        let (_, x, y) = POSE
            .iter()
            .find(|(candidate, _, _)| *candidate == label)
            .copied()
            .unwrap_or((label, 0.5, 0.5));
        Joint {
            label,
            x: left + x * box_width,
            y: top + y * box_height,
        }
    };

    let limbs = LIMBS
        .iter()
        .map(|(start, end)| Limb {
            start: joint(*start),
            end: joint(*end),
        })
        .collect();
    vec![SkeletalBody { limbs }]
}
