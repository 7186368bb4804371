use crate::limits::LimitKind;

#[derive(Debug, Clone, Default)]
pub struct PageMetrics {
    pub page_number: usize,
    /// Elements written, canvases included.
    pub elements: usize,
    pub paths: usize,
    pub glyph_runs: usize,
    pub images: usize,
    pub canvases: usize,
    /// Canvases folded into their only child.
    pub collapsed_frames: usize,
    pub brush_resources: usize,
    pub rasterized_visuals: usize,
    pub limit_violations: Vec<LimitKind>,
    pub markup_bytes: usize,
}

#[derive(Debug, Clone, Default)]
pub struct DocumentMetrics {
    pub pages: Vec<PageMetrics>,
    pub font_commits: usize,
    pub total_bytes: usize,
}

impl DocumentMetrics {
    pub fn record_page(&mut self, page: PageMetrics) {
        self.total_bytes += page.markup_bytes;
        self.pages.push(page);
    }

    pub fn total_elements(&self) -> usize {
        self.pages.iter().map(|p| p.elements).sum()
    }
}
