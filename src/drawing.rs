use crate::config::CanvasConfig;
use crate::types::{Point, PointerEvent, Tool};
use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};

/// 手書きスケッチのキャンバス
///
/// バッキングバッファは設定の解像度で固定し、表示サイズ（クライアント座標）とは
/// 独立させる。ポインタ座標は `backing / client` の比率で拡大してから描画する。
///
/// バッファは RGB のみで常に不透明。消しゴムは背景色で塗る。
/// 表示サイズが変わるとバッファは作り直され、描いた内容は消える。
pub struct DrawingSurface {
    config: CanvasConfig,
    raster: Option<RgbImage>,
    client_size: Option<(u32, u32)>,
    tool: Tool,
    /// 描画中ストロークの直前の点（バッキング座標）
    last_point: Option<(f32, f32)>,
}

impl DrawingSurface {
    pub fn new(config: &CanvasConfig) -> Self {
        Self {
            config: config.clone(),
            raster: None,
            client_size: None,
            tool: Tool::Pen,
            last_point: None,
        }
    }

    /// 表示サイズを設定
    ///
    /// サイズが変わった場合はバッファを作り直して背景色で塗りつぶす。
    pub fn resize(&mut self, client_width: u32, client_height: u32) {
        if client_width == 0 || client_height == 0 {
            log::debug!("表示サイズが0のためリサイズを無視: {}x{}", client_width, client_height);
            return;
        }
        if self.client_size == Some((client_width, client_height)) {
            return;
        }

        let background = Rgb(self.config.background_color);
        self.raster = Some(RgbImage::from_pixel(
            self.config.width.max(1),
            self.config.height.max(1),
            background,
        ));
        self.client_size = Some((client_width, client_height));
        self.last_point = None;
        log::debug!(
            "キャンバスを再初期化: 表示 {}x{}, バッファ {}x{}",
            client_width,
            client_height,
            self.config.width,
            self.config.height
        );
    }

    /// ポインタイベントを処理
    pub fn handle(&mut self, event: PointerEvent) {
        match event {
            PointerEvent::Down(p) => self.begin_stroke(p),
            PointerEvent::Move(p) => self.extend_stroke(p),
            PointerEvent::Up | PointerEvent::Leave => self.end_stroke(),
        }
    }

    pub fn begin_stroke(&mut self, point: Point) {
        let Some(start) = self.to_backing(point) else {
            return;
        };
        self.paint_segment(start, start);
        self.last_point = Some(start);
    }

    /// 直前の点から現在の点まで線を引く（丸い端点・丸い接合）
    pub fn extend_stroke(&mut self, point: Point) {
        let Some(from) = self.last_point else {
            return;
        };
        let Some(to) = self.to_backing(point) else {
            return;
        };
        self.paint_segment(from, to);
        self.last_point = Some(to);
    }

    pub fn end_stroke(&mut self) {
        self.last_point = None;
    }

    /// 背景色で塗りつぶす
    pub fn clear(&mut self) {
        let background = Rgb(self.config.background_color);
        if let Some(raster) = self.raster.as_mut() {
            for pixel in raster.pixels_mut() {
                *pixel = background;
            }
        }
        self.last_point = None;
    }

    pub fn set_tool(&mut self, tool: Tool) {
        self.tool = tool;
    }

    pub fn tool(&self) -> Tool {
        self.tool
    }

    /// JPEG でスナップショットを取る
    ///
    /// 最初の `resize` 前（レイアウト前）は `None`。
    pub fn snapshot(&self) -> Result<Option<Vec<u8>>> {
        let Some(raster) = self.raster.as_ref() else {
            return Ok(None);
        };

        let mut jpeg = Vec::new();
        {
            let quality = self.config.jpeg_quality.clamp(1, 100);
            let mut encoder = JpegEncoder::new_with_quality(&mut jpeg, quality);
            encoder
                .encode_image(raster)
                .context("スケッチのJPEGエンコードに失敗")?;
        }

        log::debug!(
            "スナップショット: {}x{} → {}バイト",
            raster.width(),
            raster.height(),
            jpeg.len()
        );
        Ok(Some(jpeg))
    }

    /// バッキング座標のピクセル値
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        let raster = self.raster.as_ref()?;
        if x >= raster.width() || y >= raster.height() {
            return None;
        }
        Some(raster.get_pixel(x, y).0)
    }

    pub fn is_initialized(&self) -> bool {
        self.raster.is_some()
    }

    pub fn is_stroking(&self) -> bool {
        self.last_point.is_some()
    }

    pub fn backing_size(&self) -> (u32, u32) {
        (self.config.width.max(1), self.config.height.max(1))
    }

    fn to_backing(&self, point: Point) -> Option<(f32, f32)> {
        let (client_width, client_height) = self.client_size?;
        let (width, height) = self.backing_size();
        let scale_x = width as f32 / client_width as f32;
        let scale_y = height as f32 / client_height as f32;
        Some((point.x * scale_x, point.y * scale_y))
    }

    fn stroke_style(&self) -> (f32, Rgb<u8>) {
        match self.tool {
            Tool::Pen => (self.config.pen_width, Rgb(self.config.pen_color)),
            Tool::Eraser => (self.config.eraser_width, Rgb(self.config.background_color)),
        }
    }

    /// 線分から半径 width/2 以内のピクセルを塗る
    fn paint_segment(&mut self, from: (f32, f32), to: (f32, f32)) {
        let (stroke_width, color) = self.stroke_style();
        let Some(raster) = self.raster.as_mut() else {
            return;
        };

        let radius = (stroke_width / 2.0).max(0.5);
        let (w, h) = (raster.width() as f32, raster.height() as f32);
        let min_x = (from.0.min(to.0) - radius).floor().max(0.0);
        let max_x = (from.0.max(to.0) + radius).ceil().min(w - 1.0);
        let min_y = (from.1.min(to.1) - radius).floor().max(0.0);
        let max_y = (from.1.max(to.1) + radius).ceil().min(h - 1.0);
        if min_x > max_x || min_y > max_y {
            return;
        }

        let (dx, dy) = (to.0 - from.0, to.1 - from.1);
        let len_sq = dx * dx + dy * dy;
        let radius_sq = radius * radius;

        for y in min_y as u32..=max_y as u32 {
            for x in min_x as u32..=max_x as u32 {
                let (px, py) = (x as f32 + 0.5, y as f32 + 0.5);
                let t = if len_sq > 0.0 {
                    (((px - from.0) * dx + (py - from.1) * dy) / len_sq).clamp(0.0, 1.0)
                } else {
                    0.0
                };
                let (cx, cy) = (from.0 + t * dx, from.1 + t * dy);
                let dist_sq = (px - cx) * (px - cx) + (py - cy) * (py - cy);
                if dist_sq <= radius_sq {
                    raster.put_pixel(x, y, color);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLACK: [u8; 3] = [0, 0, 0];
    const WHITE: [u8; 3] = [255, 255, 255];

    fn surface() -> DrawingSurface {
        DrawingSurface::new(&CanvasConfig::default())
    }

    #[test]
    fn test_snapshot_before_layout_is_none() {
        let surface = surface();
        assert!(!surface.is_initialized());
        assert!(surface.snapshot().unwrap().is_none());
    }

    #[test]
    fn test_resize_fills_background() {
        let mut surface = surface();
        surface.resize(800, 600);
        assert_eq!(surface.pixel(0, 0), Some(WHITE));
        assert_eq!(surface.pixel(799, 599), Some(WHITE));
        assert_eq!(surface.pixel(800, 0), None);
    }

    #[test]
    fn test_pointer_is_rescaled_to_backing() {
        let mut surface = surface();
        // 表示は半分のサイズ
        surface.resize(400, 300);
        surface.handle(PointerEvent::Down(Point::new(100.0, 100.0)));
        surface.handle(PointerEvent::Up);

        assert_eq!(surface.pixel(200, 200), Some(BLACK));
        assert_eq!(surface.pixel(100, 100), Some(WHITE));
    }

    #[test]
    fn test_same_relative_point_across_client_sizes() {
        for (cw, ch) in [(400, 300), (800, 600), (1600, 1200), (533, 400)] {
            let mut surface = surface();
            surface.resize(cw, ch);
            let p = Point::new(cw as f32 * 0.25, ch as f32 * 0.5);
            surface.handle(PointerEvent::Down(p));
            surface.handle(PointerEvent::Up);

            // バッキング上は (200, 300) 付近、1ピクセル以内
            let hit = (199..=201)
                .flat_map(|x| (299..=301).map(move |y| (x, y)))
                .any(|(x, y)| surface.pixel(x, y) == Some(BLACK));
            assert!(hit, "client {}x{}", cw, ch);
        }
    }

    #[test]
    fn test_stroke_connects_points() {
        let mut surface = surface();
        surface.resize(800, 600);
        surface.handle(PointerEvent::Down(Point::new(100.0, 100.0)));
        surface.handle(PointerEvent::Move(Point::new(200.0, 100.0)));
        surface.handle(PointerEvent::Up);

        for x in [100, 125, 150, 175, 199] {
            assert_eq!(surface.pixel(x, 100), Some(BLACK), "x={}", x);
        }
        assert_eq!(surface.pixel(150, 110), Some(WHITE));
    }

    #[test]
    fn test_move_without_down_draws_nothing() {
        let mut surface = surface();
        surface.resize(800, 600);
        surface.handle(PointerEvent::Move(Point::new(50.0, 50.0)));
        surface.handle(PointerEvent::Move(Point::new(60.0, 50.0)));
        assert_eq!(surface.pixel(55, 50), Some(WHITE));
    }

    #[test]
    fn test_leave_ends_stroke() {
        let mut surface = surface();
        surface.resize(800, 600);
        surface.handle(PointerEvent::Down(Point::new(10.0, 10.0)));
        assert!(surface.is_stroking());
        surface.handle(PointerEvent::Leave);
        assert!(!surface.is_stroking());

        surface.handle(PointerEvent::Move(Point::new(300.0, 300.0)));
        assert_eq!(surface.pixel(150, 150), Some(WHITE));
    }

    #[test]
    fn test_eraser_paints_background_with_larger_width() {
        let mut surface = surface();
        surface.resize(800, 600);
        surface.handle(PointerEvent::Down(Point::new(100.0, 100.0)));
        surface.handle(PointerEvent::Move(Point::new(300.0, 100.0)));
        surface.handle(PointerEvent::Up);
        assert_eq!(surface.pixel(200, 100), Some(BLACK));

        surface.set_tool(Tool::Eraser);
        assert_eq!(surface.tool(), Tool::Eraser);
        surface.handle(PointerEvent::Down(Point::new(200.0, 105.0)));
        surface.handle(PointerEvent::Up);

        // 半径10の範囲が背景色に戻る
        assert_eq!(surface.pixel(200, 100), Some(WHITE));
        assert_eq!(surface.pixel(195, 100), Some(WHITE));
        assert_eq!(surface.pixel(100, 100), Some(BLACK));
    }

    #[test]
    fn test_clear_refills_background() {
        let mut surface = surface();
        surface.resize(800, 600);
        surface.handle(PointerEvent::Down(Point::new(10.0, 10.0)));
        surface.handle(PointerEvent::Up);
        surface.clear();
        assert_eq!(surface.pixel(10, 10), Some(WHITE));
    }

    #[test]
    fn test_resize_to_new_size_discards_drawing() {
        let mut surface = surface();
        surface.resize(800, 600);
        surface.handle(PointerEvent::Down(Point::new(10.0, 10.0)));
        surface.handle(PointerEvent::Up);

        // 同じサイズなら保持
        surface.resize(800, 600);
        assert_eq!(surface.pixel(10, 10), Some(BLACK));

        surface.resize(640, 480);
        assert_eq!(surface.pixel(10, 10), Some(WHITE));
    }

    #[test]
    fn test_zero_resize_ignored() {
        let mut surface = surface();
        surface.resize(0, 600);
        assert!(!surface.is_initialized());
    }

    #[test]
    fn test_snapshot_is_jpeg() {
        let mut surface = surface();
        surface.resize(400, 300);
        surface.handle(PointerEvent::Down(Point::new(50.0, 50.0)));
        surface.handle(PointerEvent::Move(Point::new(350.0, 250.0)));
        surface.handle(PointerEvent::Up);

        let jpeg = surface.snapshot().unwrap().unwrap();
        assert_eq!(&jpeg[0..2], &[0xFF, 0xD8]);

        let decoded =
            image::load_from_memory_with_format(&jpeg, image::ImageFormat::Jpeg).unwrap();
        assert_eq!(decoded.width(), 800);
        assert_eq!(decoded.height(), 600);
    }

    #[test]
    fn test_snapshot_is_opaque_rgb() {
        let mut surface = surface();
        surface.resize(800, 600);
        let jpeg = surface.snapshot().unwrap().unwrap();
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert!(!decoded.color().has_alpha());
    }
}
