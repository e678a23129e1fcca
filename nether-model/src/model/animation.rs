//! Animations and shared timelines
//!
//! Samplers that read their key times from the same accessor share one
//! [`TimeLine`]. Playback itself lives in the runtime evaluator; this module
//! only provides the data and the frame lookup it needs.

use hashbrown::HashMap;
use serde_json::Value;

use super::buffer::{Accessor, Buffer, BufferView, ComponentType, ElementType};
use crate::error::{Diagnostics, ModelError};
use crate::json::JsonExt;

/// Largest deviation from a uniform grid that still counts as fixed-rate.
pub const FIXED_RATE_TOLERANCE: f32 = 1e-4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Interpolation {
    #[default]
    Linear,
    Step,
    CatmullRomSpline,
    CubicSpline,
}

impl Interpolation {
    pub fn from_name(name: &str) -> Option<Self> {
        [
            ("LINEAR", Interpolation::Linear),
            ("STEP", Interpolation::Step),
            ("CATMULLROMSPLINE", Interpolation::CatmullRomSpline),
            ("CUBICSPLINE", Interpolation::CubicSpline),
        ]
        .into_iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, i)| i)
    }

    /// Whether `input` key times and `output` values form a valid pairing.
    pub fn counts_are_valid(self, input: usize, output: usize) -> bool {
        match self {
            Interpolation::Linear | Interpolation::Step => input == output && input >= 2,
            Interpolation::CatmullRomSpline => input + 2 == output && input >= 4,
            Interpolation::CubicSpline => input == output * 3 && input >= 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnimationPath {
    Translation,
    Rotation,
    Scale,
    Weights,
}

impl AnimationPath {
    pub fn from_name(name: &str) -> Option<Self> {
        [
            ("translation", AnimationPath::Translation),
            ("rotation", AnimationPath::Rotation),
            ("scale", AnimationPath::Scale),
            ("weights", AnimationPath::Weights),
        ]
        .into_iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, p)| p)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnimationSampler {
    /// Accessor holding key times
    pub input: usize,
    /// Accessor holding key values
    pub output: usize,
    pub interpolation: Interpolation,
    /// Shared timeline built from `input`
    pub timeline: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnimationChannel {
    pub sampler: usize,
    /// `None` leaves the channel without a target
    pub node: Option<usize>,
    pub path: AnimationPath,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Animation {
    pub name: String,
    pub samplers: Vec<AnimationSampler>,
    pub channels: Vec<AnimationChannel>,
}

/// Key times shared by every sampler reading the same input accessor.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeLine {
    pub accessor: usize,
    pub sample_times: Vec<f32>,
    pub start_time: f32,
    pub end_time: f32,
    /// Reciprocal of the key spacing for fixed-rate timelines, otherwise 0
    pub rcp_step: f32,
}

impl TimeLine {
    pub fn new(accessor: usize, sample_times: Vec<f32>) -> Self {
        let start_time = sample_times.first().copied().unwrap_or(0.0);
        let end_time = sample_times.last().copied().unwrap_or(0.0);
        let mut timeline = Self {
            accessor,
            sample_times,
            start_time,
            end_time,
            rcp_step: 0.0,
        };

        let count = timeline.sample_count();
        if count >= 2 {
            let step = (end_time - start_time) / (count - 1) as f32;
            let uniform = step > 0.0
                && timeline
                    .sample_times
                    .iter()
                    .enumerate()
                    .all(|(i, &t)| (t - (start_time + i as f32 * step)).abs() <= FIXED_RATE_TOLERANCE);
            if uniform {
                timeline.rcp_step = 1.0 / step;
            }
        }
        timeline
    }

    pub fn sample_count(&self) -> usize {
        self.sample_times.len()
    }

    pub fn is_fixed_rate(&self) -> bool {
        self.rcp_step != 0.0
    }

    /// Key frame index and blend fraction towards the next key at `time`.
    pub fn frame_and_fraction(&self, time: f32) -> (usize, f32) {
        let count = self.sample_count();
        if count < 2 || time <= self.start_time {
            return (0, 0.0);
        }
        let last = count - 2;
        if time >= self.end_time {
            return (last, 1.0);
        }

        let frame = if self.is_fixed_rate() {
            ((time - self.start_time) * self.rcp_step) as usize
        } else {
            self.sample_times.partition_point(|&t| t <= time).saturating_sub(1)
        }
        .min(last);

        let t0 = self.sample_times[frame];
        let t1 = self.sample_times[frame + 1];
        let fraction = if t1 > t0 { (time - t0) / (t1 - t0) } else { 0.0 };
        (frame, fraction.clamp(0.0, 1.0))
    }
}

/// How a free-running clock maps onto a model's animation time domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnimationTimeType {
    OnceForward,
    #[default]
    LoopForward,
    LoopForwardAndBack,
}

impl AnimationTimeType {
    /// Wrap `time` for a domain ending at `end_time`.
    pub fn wrap(self, time: f32, end_time: f32) -> f32 {
        match self {
            AnimationTimeType::OnceForward => time.min(end_time),
            _ if end_time <= 0.0 => 0.0,
            AnimationTimeType::LoopForward => time.rem_euclid(end_time),
            AnimationTimeType::LoopForwardAndBack => {
                let t = time.rem_euclid(end_time * 2.0);
                if t > end_time { 2.0 * end_time - t } else { t }
            }
        }
    }
}

/// Timelines of a model, keyed by their input accessor.
#[derive(Debug, Default)]
pub(crate) struct TimeLines {
    by_accessor: HashMap<usize, usize>,
    pub timelines: Vec<TimeLine>,
}

impl TimeLines {
    /// Timeline for `accessor`, created on first use.
    fn get_or_create(
        &mut self,
        accessor: usize,
        accessors: &[Accessor],
        views: &[BufferView],
        buffers: &[Buffer],
    ) -> Result<usize, ModelError> {
        if let Some(&index) = self.by_accessor.get(&accessor) {
            return Ok(index);
        }
        let times = accessors[accessor].read::<f32>(views, buffers)?;
        let index = self.timelines.len();
        self.timelines.push(TimeLine::new(accessor, times));
        self.by_accessor.insert(accessor, index);
        Ok(index)
    }

    /// Union of every timeline's range, or `(0, 0)` with no timelines.
    pub fn time_domain(&self) -> (f32, f32) {
        self.timelines
            .iter()
            .map(|t| (t.start_time, t.end_time))
            .reduce(|(s0, e0), (s1, e1)| (s0.min(s1), e0.max(e1)))
            .unwrap_or((0.0, 0.0))
    }
}

/// Sources an animation resolves against.
pub(crate) struct AnimationContext<'a> {
    pub accessors: &'a [Accessor],
    pub views: &'a [BufferView],
    pub buffers: &'a [Buffer],
    pub node_count: usize,
}

impl AnimationContext<'_> {
    pub fn load_animation(
        &self,
        value: &Value,
        timelines: &mut TimeLines,
        diag: &mut Diagnostics,
    ) -> Result<Animation, ModelError> {
        let mut animation = Animation {
            name: value.child_str("name").to_string(),
            ..Animation::default()
        };

        match value.child_array("samplers") {
            None => diag.schema(format!("animation '{}' has no samplers", animation.name)),
            Some(samplers) => {
                for sampler in samplers {
                    let sampler = self.load_sampler(sampler, &animation.name, timelines, diag)?;
                    animation.samplers.push(sampler);
                }
            }
        }

        match value.child_array("channels") {
            None => diag.schema(format!("animation '{}' has no channels", animation.name)),
            Some(channels) => {
                for channel in channels {
                    if let Some(channel) =
                        self.load_channel(channel, &animation.name, animation.samplers.len(), diag)
                    {
                        animation.channels.push(channel);
                    }
                }
            }
        }

        Ok(animation)
    }

    fn load_sampler(
        &self,
        value: &Value,
        animation: &str,
        timelines: &mut TimeLines,
        diag: &mut Diagnostics,
    ) -> Result<AnimationSampler, ModelError> {
        let count = self.accessors.len();
        let input = diag.index(value.child_i64("input", -1), count, "animation sampler input");
        let output = diag.index(value.child_i64("output", -1), count, "animation sampler output");

        let name = value.child_str_or("interpolation", "LINEAR");
        let interpolation = Interpolation::from_name(name).unwrap_or_else(|| {
            diag.schema(format!("invalid interpolation '{name}' in animation '{animation}'"));
            Interpolation::Linear
        });

        let mut sampler = AnimationSampler {
            input: input.unwrap_or(0),
            output: output.unwrap_or(0),
            interpolation,
            timeline: None,
        };

        let Some(input) = input else {
            return Ok(sampler);
        };
        let input_accessor = &self.accessors[input];
        if input_accessor.component_type != ComponentType::Float
            || input_accessor.element_type != ElementType::Scalar
        {
            diag.schema(format!(
                "animation '{animation}' sampler input '{}' is not FLOAT SCALAR",
                input_accessor.name
            ));
            return Ok(sampler);
        }
        if let Some(output) = output {
            let (n_in, n_out) = (input_accessor.count, self.accessors[output].count);
            if !interpolation.counts_are_valid(n_in, n_out) {
                diag.schema(format!(
                    "animation '{animation}' {interpolation:?} sampler has {n_in} key times and {n_out} values"
                ));
            }
        }
        if input_accessor.count >= 2 {
            sampler.timeline = Some(timelines.get_or_create(input, self.accessors, self.views, self.buffers)?);
        }
        Ok(sampler)
    }

    fn load_channel(
        &self,
        value: &Value,
        animation: &str,
        sampler_count: usize,
        diag: &mut Diagnostics,
    ) -> Option<AnimationChannel> {
        let sampler = diag.index(value.child_i64("sampler", -1), sampler_count, "animation channel sampler");

        let Some(target) = value.child("target").filter(|t| t.is_object()) else {
            diag.schema(format!("channel in animation '{animation}' has no target"));
            return None;
        };
        let node = match target.child("node") {
            None => None,
            Some(_) => diag.index(target.child_i64("node", -1), self.node_count, "animation target node"),
        };
        let path_name = target.child_str("path");
        let path = AnimationPath::from_name(path_name);
        if path.is_none() {
            diag.schema(format!("invalid target path '{path_name}' in animation '{animation}'"));
        }

        Some(AnimationChannel {
            sampler: sampler?,
            node,
            path: path?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::buffer::BufferUsage;
    use serde_json::json;

    #[test]
    fn test_interpolation_counts() {
        assert!(Interpolation::Linear.counts_are_valid(3, 3));
        assert!(!Interpolation::Step.counts_are_valid(1, 1));
        assert!(Interpolation::CatmullRomSpline.counts_are_valid(4, 6));
        assert!(!Interpolation::CatmullRomSpline.counts_are_valid(3, 5));
        assert!(Interpolation::CubicSpline.counts_are_valid(6, 2));
        assert!(!Interpolation::CubicSpline.counts_are_valid(2, 6));
        assert_eq!(Interpolation::from_name("step"), Some(Interpolation::Step));
        assert_eq!(AnimationPath::from_name("Weights"), Some(AnimationPath::Weights));
    }

    #[test]
    fn test_fixed_rate_timeline() {
        let timeline = TimeLine::new(0, vec![0.0, 0.5, 1.0, 1.5]);
        assert!(timeline.is_fixed_rate());
        assert_eq!(timeline.rcp_step, 2.0);
        assert_eq!(timeline.frame_and_fraction(0.75), (1, 0.5));
        assert_eq!(timeline.frame_and_fraction(-1.0), (0, 0.0));
        assert_eq!(timeline.frame_and_fraction(2.0), (2, 1.0));
    }

    #[test]
    fn test_variable_rate_timeline() {
        let timeline = TimeLine::new(0, vec![0.0, 0.1, 1.0, 1.2]);
        assert!(!timeline.is_fixed_rate());
        let (frame, fraction) = timeline.frame_and_fraction(0.55);
        assert_eq!(frame, 1);
        assert!((fraction - 0.5).abs() < 1e-5);
        assert_eq!(timeline.frame_and_fraction(1.1).0, 2);
    }

    #[test]
    fn test_time_types() {
        assert_eq!(AnimationTimeType::OnceForward.wrap(5.0, 2.0), 2.0);
        assert_eq!(AnimationTimeType::LoopForward.wrap(5.0, 2.0), 1.0);
        assert_eq!(AnimationTimeType::LoopForwardAndBack.wrap(3.5, 2.0), 0.5);
        assert_eq!(AnimationTimeType::LoopForwardAndBack.wrap(1.5, 2.0), 1.5);
        assert_eq!(AnimationTimeType::LoopForward.wrap(5.0, 0.0), 0.0);
    }

    struct Keys {
        accessors: Vec<Accessor>,
        views: Vec<BufferView>,
        buffers: Vec<Buffer>,
    }

    /// Accessor 0: three key times; accessor 1: three vec3 values.
    fn keys() -> Keys {
        let mut bytes: Vec<u8> = bytemuck::cast_slice(&[0.0f32, 1.0, 2.0]).to_vec();
        bytes.extend_from_slice(bytemuck::cast_slice(&[0.0f32; 9]));
        let view = |byte_offset, byte_length| BufferView {
            name: String::new(),
            buffer: 0,
            byte_offset,
            byte_length,
            byte_stride: 0,
            usage: BufferUsage::Generic,
        };
        let accessor = |buffer_view, element_type| Accessor {
            name: String::new(),
            buffer_view,
            byte_offset: 0,
            element_type,
            component_type: ComponentType::Float,
            count: 3,
            normalized: false,
            range: None,
        };
        Keys {
            accessors: vec![accessor(0, ElementType::Scalar), accessor(1, ElementType::Vec3)],
            views: vec![view(0, 12), view(12, 36)],
            buffers: vec![Buffer::new("bin", bytes)],
        }
    }

    #[test]
    fn test_load_animation_shares_timelines() {
        let keys = keys();
        let ctx = AnimationContext {
            accessors: &keys.accessors,
            views: &keys.views,
            buffers: &keys.buffers,
            node_count: 2,
        };
        let doc = json!({
            "name": "walk",
            "samplers": [
                { "input": 0, "output": 1 },
                { "input": 0, "output": 1, "interpolation": "STEP" }
            ],
            "channels": [
                { "sampler": 0, "target": { "node": 1, "path": "translation" } },
                { "sampler": 1, "target": { "path": "scale" } }
            ]
        });
        let mut timelines = TimeLines::default();
        let mut diag = Diagnostics::new("test");
        let animation = ctx.load_animation(&doc, &mut timelines, &mut diag).unwrap();
        assert!(diag.is_loaded());
        assert_eq!(timelines.timelines.len(), 1);
        assert_eq!(animation.samplers[0].timeline, Some(0));
        assert_eq!(animation.samplers[1].timeline, Some(0));
        assert_eq!(animation.channels[1].node, None);
        assert_eq!(timelines.time_domain(), (0.0, 2.0));
    }

    #[test]
    fn test_load_animation_problems() {
        let keys = keys();
        let ctx = AnimationContext {
            accessors: &keys.accessors,
            views: &keys.views,
            buffers: &keys.buffers,
            node_count: 1,
        };
        let doc = json!({
            "samplers": [
                { "input": 1, "output": 0 },
                { "input": 0, "output": 1, "interpolation": "CUBICSPLINE" }
            ],
            "channels": [
                { "sampler": 4, "target": { "node": 0, "path": "translation" } },
                { "sampler": 0, "target": { "node": 3, "path": "skew" } },
                { "sampler": 0 }
            ]
        });
        let mut diag = Diagnostics::new("test");
        ctx.load_animation(&doc, &mut TimeLines::default(), &mut diag).unwrap();
        // input type, cubic counts, sampler index, node index, path, target
        assert_eq!(diag.finish(()).unwrap_err().problems().len(), 6);
    }
}
