//! Implementation limits of the fixed-page format. Exceeding one is not an
//! error: the page gets an `XPSLimit:<Name>` comment once per page.

pub const MAX_ELEMENTS: usize = 1_000_000;
pub const MAX_FIGURE_POINTS: usize = 100_000;
pub const MAX_RESOURCES: usize = 10_000;
pub const MAX_GLYPHS: usize = 5_000;
pub const MAX_GRADIENT_STOPS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LimitKind {
    FloatRange,
    PointCount,
    GlyphCount,
    GradientStopCount,
    ResourceCount,
    ElementCount,
}

impl LimitKind {
    const ALL: [LimitKind; 6] = [
        LimitKind::FloatRange,
        LimitKind::PointCount,
        LimitKind::GlyphCount,
        LimitKind::GradientStopCount,
        LimitKind::ResourceCount,
        LimitKind::ElementCount,
    ];

    pub fn name(self) -> &'static str {
        match self {
            LimitKind::FloatRange => "FloatRange",
            LimitKind::PointCount => "PointCount",
            LimitKind::GlyphCount => "GlyphCount",
            LimitKind::GradientStopCount => "GradientStopCount",
            LimitKind::ResourceCount => "ResourceCount",
            LimitKind::ElementCount => "ElementCount",
        }
    }

    /// Comment text marking the violation.
    pub fn marker(self) -> String {
        format!("XPSLimit:{}", self.name())
    }

    fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

/// Running per-page totals and the set of limits already reported.
#[derive(Debug, Default)]
pub struct LimitTracker {
    elements: usize,
    resources: usize,
    reported: u8,
    pending: Vec<LimitKind>,
}

impl LimitTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn flag(&mut self, kind: LimitKind) {
        if self.reported & kind.bit() == 0 {
            self.reported |= kind.bit();
            log::warn!("page exceeds format limit {}", kind.name());
            self.pending.push(kind);
        }
    }

    pub fn count_element(&mut self) {
        self.elements += 1;
        if self.elements > MAX_ELEMENTS {
            self.flag(LimitKind::ElementCount);
        }
    }

    pub fn count_resource(&mut self) {
        self.resources += 1;
        if self.resources > MAX_RESOURCES {
            self.flag(LimitKind::ResourceCount);
        }
    }

    pub fn check_figure_points(&mut self, points: usize) {
        if points > MAX_FIGURE_POINTS {
            self.flag(LimitKind::PointCount);
        }
    }

    pub fn check_glyphs(&mut self, glyphs: usize) {
        if glyphs > MAX_GLYPHS {
            self.flag(LimitKind::GlyphCount);
        }
    }

    pub fn check_gradient_stops(&mut self, stops: usize) {
        if stops > MAX_GRADIENT_STOPS {
            self.flag(LimitKind::GradientStopCount);
        }
    }

    pub fn flag_float_range(&mut self) {
        self.flag(LimitKind::FloatRange);
    }

    /// Violations not yet written as comments.
    pub fn take_pending(&mut self) -> Vec<LimitKind> {
        std::mem::take(&mut self.pending)
    }

    /// Every limit reported on this page.
    pub fn reported(&self) -> Vec<LimitKind> {
        LimitKind::ALL
            .into_iter()
            .filter(|k| self.reported & k.bit() != 0)
            .collect()
    }

    pub fn element_count(&self) -> usize {
        self.elements
    }

    pub fn resource_count(&self) -> usize {
        self.resources
    }

    pub fn reset_page(&mut self) {
        *self = Self::default();
    }
}
