//! Mock effects shared by unit tests. All render RGBA float pixels.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::entities::clip::ClipDescriptor;
use crate::entities::image::Image;
use crate::entities::keys::SIMPLE_SOURCE_CLIP;
use crate::entities::params::ParamDescriptor;
use crate::entities::plugin::{
    DstTile, EffectContext, EffectDescriptor, ImageEffect, InstanceChangedArgs, RenderArgs, RenderContext,
    RenderThreadSafety, RodArgs, RoiArgs, SequenceArgs, Status, StatusResult,
};
use crate::entities::region::RectD;
use crate::entities::traits::AbortFlag;

const RGBA_F32: usize = 16;

/// Pixel `(x, y)` of a float RGBA image.
pub fn read_rgba(image: &Image, x: i32, y: i32) -> [f32; 4] {
    let bytes = image.pixel(x, y).expect("pixel outside image");
    bytemuck::pod_read_unaligned::<[f32; 4]>(bytes)
}

/// Write `f(x, y)` into every pixel of the tile.
fn fill(dst: &mut DstTile<'_>, f: impl Fn(i32, i32) -> [f32; 4]) -> StatusResult<()> {
    if dst.layout.bytes_per_pixel() != RGBA_F32 {
        return Err(Status::ErrUnsupported);
    }
    let window = dst.window;
    for y in window.y1..window.y2 {
        let row = dst.row_mut(y).ok_or(Status::ErrBadIndex)?;
        for (i, px) in row.chunks_exact_mut(RGBA_F32).enumerate() {
            px.copy_from_slice(bytemuck::bytes_of(&f(window.x1 + i as i32, y)));
        }
    }
    Ok(())
}

/// Apply `f` to the simple source, transparent black outside it.
fn map_source(ctx: &RenderContext<'_>, dst: &mut DstTile<'_>, f: impl Fn([f32; 4]) -> [f32; 4]) -> StatusResult<()> {
    let src = ctx.effect.source_image(SIMPLE_SOURCE_CLIP).ok_or(Status::Failed)?;
    fill(dst, |x, y| {
        src.pixel(x, y)
            .map(|b| f(bytemuck::pod_read_unaligned::<[f32; 4]>(b)))
            .unwrap_or([0.0; 4])
    })
}

/// Generator filling its RoD with the `value` param.
#[derive(Clone)]
pub struct ConstantEffect {
    value: f64,
}

impl ConstantEffect {
    pub fn new(value: f64) -> Self {
        Self { value }
    }
}

impl ImageEffect for ConstantEffect {
    fn describe(&self) -> EffectDescriptor {
        EffectDescriptor::new("test.constant", "Constant").param(ParamDescriptor::double("value", self.value))
    }

    fn box_clone(&self) -> Box<dyn ImageEffect> {
        Box::new(self.clone())
    }

    fn render(&self, ctx: &RenderContext<'_>, _args: &RenderArgs, dst: &mut DstTile<'_>) -> StatusResult<()> {
        let v = ctx
            .effect
            .param("value")
            .and_then(|p| p.as_double())
            .map_err(|_| Status::ErrBadHandle)?
            .get() as f32;
        fill(dst, |_, _| [v; 4])
    }
}

/// Inverts RGB of its source, keeps alpha.
#[derive(Clone)]
pub struct InvertEffect;

impl ImageEffect for InvertEffect {
    fn describe(&self) -> EffectDescriptor {
        EffectDescriptor::new("test.invert", "Invert").clip(ClipDescriptor::source(SIMPLE_SOURCE_CLIP))
    }

    fn box_clone(&self) -> Box<dyn ImageEffect> {
        Box::new(self.clone())
    }

    fn render(&self, ctx: &RenderContext<'_>, _args: &RenderArgs, dst: &mut DstTile<'_>) -> StatusResult<()> {
        map_source(ctx, dst, |[r, g, b, a]| [1.0 - r, 1.0 - g, 1.0 - b, a])
    }
}

/// Sums sources `A` and `B` pixel by pixel.
#[derive(Clone)]
pub struct AddEffect;

impl ImageEffect for AddEffect {
    fn describe(&self) -> EffectDescriptor {
        EffectDescriptor::new("test.add", "Add")
            .clip(ClipDescriptor::source("A"))
            .clip(ClipDescriptor::source("B"))
    }

    fn box_clone(&self) -> Box<dyn ImageEffect> {
        Box::new(self.clone())
    }

    fn render(&self, ctx: &RenderContext<'_>, _args: &RenderArgs, dst: &mut DstTile<'_>) -> StatusResult<()> {
        let a = ctx.effect.source_image("A").ok_or(Status::Failed)?;
        let b = ctx.effect.source_image("B").ok_or(Status::Failed)?;
        let at = |img: &Image, x: i32, y: i32| {
            img.pixel(x, y)
                .map(bytemuck::pod_read_unaligned::<[f32; 4]>)
                .unwrap_or([0.0; 4])
        };
        fill(dst, |x, y| {
            let (pa, pb) = (at(a, x, y), at(b, x, y));
            [pa[0] + pb[0], pa[1] + pb[1], pa[2] + pb[2], pa[3] + pb[3]]
        })
    }
}

/// Passes its source through, limited to `rect`.
#[derive(Clone)]
pub struct CropEffect {
    rect: RectD,
}

impl CropEffect {
    pub fn new(rect: RectD) -> Self {
        Self { rect }
    }
}

impl ImageEffect for CropEffect {
    fn describe(&self) -> EffectDescriptor {
        EffectDescriptor::new("test.crop", "Crop").clip(ClipDescriptor::source(SIMPLE_SOURCE_CLIP))
    }

    fn box_clone(&self) -> Box<dyn ImageEffect> {
        Box::new(self.clone())
    }

    fn region_of_definition(&self, ctx: &EffectContext<'_>, _args: &RodArgs) -> StatusResult<RectD> {
        Ok(ctx
            .source_rod(SIMPLE_SOURCE_CLIP)
            .map_or(self.rect, |rod| rod.intersect(&self.rect)))
    }

    fn render(&self, ctx: &RenderContext<'_>, _args: &RenderArgs, dst: &mut DstTile<'_>) -> StatusResult<()> {
        map_source(ctx, dst, |px| px)
    }
}

/// Declares the given source clips and renders black.
#[derive(Clone)]
pub struct ClipsEffect {
    clips: Vec<String>,
}

impl ClipsEffect {
    pub fn new(clips: &[&str]) -> Self {
        Self {
            clips: clips.iter().map(|c| c.to_string()).collect(),
        }
    }
}

impl ImageEffect for ClipsEffect {
    fn describe(&self) -> EffectDescriptor {
        self.clips
            .iter()
            .fold(EffectDescriptor::new("test.clips", "Clips"), |d, c| {
                d.clip(ClipDescriptor::source(c.as_str()))
            })
    }

    fn box_clone(&self) -> Box<dyn ImageEffect> {
        Box::new(self.clone())
    }

    fn render(&self, _ctx: &RenderContext<'_>, _args: &RenderArgs, _dst: &mut DstTile<'_>) -> StatusResult<()> {
        Ok(())
    }
}

/// Asks for its render region grown by a margin on the source.
#[derive(Clone)]
pub struct GrowRoiEffect {
    margin: f64,
}

impl GrowRoiEffect {
    pub fn new(margin: f64) -> Self {
        Self { margin }
    }
}

impl ImageEffect for GrowRoiEffect {
    fn describe(&self) -> EffectDescriptor {
        EffectDescriptor::new("test.grow", "Grow").clip(ClipDescriptor::source(SIMPLE_SOURCE_CLIP))
    }

    fn box_clone(&self) -> Box<dyn ImageEffect> {
        Box::new(self.clone())
    }

    fn regions_of_interest(
        &self,
        _ctx: &EffectContext<'_>,
        args: &RoiArgs,
        rois: &mut HashMap<String, RectD>,
    ) -> StatusResult<()> {
        let r = args.region;
        let m = self.margin;
        rois.insert(
            SIMPLE_SOURCE_CLIP.to_string(),
            RectD::new(r.x1 - m, r.y1 - m, r.x2 + m, r.y2 + m),
        );
        Ok(())
    }

    fn render(&self, _ctx: &RenderContext<'_>, _args: &RenderArgs, _dst: &mut DstTile<'_>) -> StatusResult<()> {
        Ok(())
    }
}

/// Thread-unsafe generator that raises `flag` once `after` tiles rendered.
#[derive(Clone)]
pub struct AbortingEffect {
    flag: AbortFlag,
    after: usize,
    rendered: Arc<AtomicUsize>,
}

impl AbortingEffect {
    pub fn new(flag: AbortFlag, after: usize) -> Self {
        Self {
            flag,
            after,
            rendered: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn rendered(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.rendered)
    }
}

impl ImageEffect for AbortingEffect {
    fn describe(&self) -> EffectDescriptor {
        EffectDescriptor::new("test.aborting", "Aborting").thread_safety(RenderThreadSafety::Unsafe)
    }

    fn box_clone(&self) -> Box<dyn ImageEffect> {
        Box::new(self.clone())
    }

    fn render(&self, _ctx: &RenderContext<'_>, _args: &RenderArgs, _dst: &mut DstTile<'_>) -> StatusResult<()> {
        if self.rendered.fetch_add(1, Ordering::SeqCst) + 1 >= self.after {
            self.flag.trigger();
        }
        Ok(())
    }
}

/// Generator whose render always fails.
#[derive(Clone)]
pub struct FailingEffect;

impl ImageEffect for FailingEffect {
    fn describe(&self) -> EffectDescriptor {
        EffectDescriptor::new("test.failing", "Failing")
    }

    fn box_clone(&self) -> Box<dyn ImageEffect> {
        Box::new(self.clone())
    }

    fn render(&self, _ctx: &RenderContext<'_>, _args: &RenderArgs, _dst: &mut DstTile<'_>) -> StatusResult<()> {
        Err(Status::Failed)
    }
}

/// Generator recording the actions it receives.
#[derive(Clone)]
pub struct RecordingEffect {
    log: Arc<Mutex<Vec<String>>>,
}

impl RecordingEffect {
    pub fn generator() -> Self {
        Self {
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn log(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.log)
    }

    fn push(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }
}

impl ImageEffect for RecordingEffect {
    fn describe(&self) -> EffectDescriptor {
        EffectDescriptor::new("test.recording", "Recording")
            .param(ParamDescriptor::double("gain", 1.0))
            .param(ParamDescriptor::string("note", "").no_evaluate())
    }

    fn box_clone(&self) -> Box<dyn ImageEffect> {
        Box::new(self.clone())
    }

    fn begin_render(&mut self, args: &SequenceArgs) -> StatusResult<()> {
        self.push(format!("begin {}..{}", args.start, args.end));
        Ok(())
    }

    fn end_render(&mut self, args: &SequenceArgs) -> StatusResult<()> {
        self.push(format!("end {}..{}", args.start, args.end));
        Ok(())
    }

    fn render(&self, _ctx: &RenderContext<'_>, args: &RenderArgs, _dst: &mut DstTile<'_>) -> StatusResult<()> {
        self.push(format!("render {}", args.time));
        Ok(())
    }

    fn instance_changed(&mut self, _ctx: &EffectContext<'_>, args: &InstanceChangedArgs) -> StatusResult<()> {
        self.push(format!("changed {} {:?}", args.param, args.reason));
        Ok(())
    }
}
