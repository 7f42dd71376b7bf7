//! 版面计算模块
//! Layout computation module
//!
//! 网格几何全部在毫米内计算，落位时换算为 PDF 点
//! All grid geometry is computed in millimetres and converted to PDF points
//! at placement time

use serde::{Deserialize, Serialize};

/// 毫米转 PDF 点的系数 (1 mm = 72/25.4 pt)
/// Millimetre to PDF point factor (1 mm = 72/25.4 pt)
pub const MM_TO_PT: f64 = 72.0 / 25.4;

/// 版面配置
/// Layout configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutConfig {
  /// 输出纸张宽度（毫米）
  /// Output sheet width, in millimetres
  pub page_width_mm: f64,
  /// 输出纸张高度（毫米）
  /// Output sheet height, in millimetres
  pub page_height_mm: f64,
  /// 网格列数
  /// Grid columns
  pub columns: usize,
  /// 网格行数
  /// Grid rows
  pub rows: usize,
  /// 四周外边距（毫米）
  /// Outer margin on all four sides, in millimetres
  pub margin_mm: f64,
  /// 相邻单元格之间的间距（毫米）
  /// Spacing between adjacent cells, in millimetres
  pub gutter_mm: f64,
  /// 栅格化时的最低有效 DPI；矢量嵌入不受影响
  /// Minimum effective DPI when rasterizing; vector embedding is unaffected
  pub min_dpi: u32,
}

impl Default for LayoutConfig {
  fn default() -> Self {
    // A4 纵向，2×4 网格
    // A4 portrait, 2x4 grid
    Self {
      page_width_mm: 210.0,
      page_height_mm: 297.0,
      columns: 2,
      rows: 4,
      margin_mm: 10.0,
      gutter_mm: 5.0,
      min_dpi: 300,
    }
  }
}

impl LayoutConfig {
  /// 每张纸的槽位数
  /// Slots per sheet
  pub fn slots_per_sheet(&self) -> usize {
    self.columns * self.rows
  }

  /// 单元格宽度（毫米）
  /// Cell width, in millimetres
  pub fn cell_width_mm(&self) -> f64 {
    (self.page_width_mm - 2.0 * self.margin_mm - (self.columns as f64 - 1.0) * self.gutter_mm)
      / self.columns as f64
  }

  /// 单元格高度（毫米）
  /// Cell height, in millimetres
  pub fn cell_height_mm(&self) -> f64 {
    (self.page_height_mm - 2.0 * self.margin_mm - (self.rows as f64 - 1.0) * self.gutter_mm)
      / self.rows as f64
  }

  /// 放下 `page_count` 个页面需要的纸张数
  /// Sheets needed to place `page_count` pages
  pub fn sheets_needed(&self, page_count: usize) -> usize {
    page_count.div_ceil(self.slots_per_sheet())
  }

  /// 槽位索引到网格位置：行优先，左上角开始
  /// Slot index to grid position: row-major from the top-left corner
  pub fn slot_position(&self, slot: usize) -> (usize, usize) {
    (slot / self.columns, slot % self.columns)
  }

  /// 槽位的单元格矩形，PDF 坐标（原点在左下角），单位为点
  /// Cell rectangle of a slot in PDF coordinates (origin bottom-left), in points
  pub fn cell_rect_pt(&self, slot: usize) -> CellRect {
    let (row, col) = self.slot_position(slot);
    let cell_w = self.cell_width_mm();
    let cell_h = self.cell_height_mm();
    let x_mm = self.margin_mm + col as f64 * (cell_w + self.gutter_mm);
    // 行从顶部数，PDF 的 y 轴从底部数
    // Rows count from the top, the PDF y axis counts from the bottom
    let y_mm =
      self.page_height_mm - self.margin_mm - row as f64 * (cell_h + self.gutter_mm) - cell_h;
    CellRect {
      x: x_mm * MM_TO_PT,
      y: y_mm * MM_TO_PT,
      width: cell_w * MM_TO_PT,
      height: cell_h * MM_TO_PT,
    }
  }
}

/// 一个单元格的矩形区域（点）
/// Rectangle of one cell, in points
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellRect {
  pub x: f64,
  pub y: f64,
  pub width: f64,
  pub height: f64,
}

/// 保持宽高比的适配缩放
/// Aspect-preserving fit scale
///
/// `s = min(cell_w / page_w, cell_h / page_h)`；超出单元格的页面被
/// 缩小放入，绝不裁剪
/// Pages larger than the cell are scaled down, never cropped
pub fn fit_scale(page_w: f64, page_h: f64, cell_w: f64, cell_h: f64) -> f64 {
  if page_w <= 0.0 || page_h <= 0.0 {
    return 1.0;
  }
  (cell_w / page_w).min(cell_h / page_h)
}

/// 页面在单元格中的落位：缩放后居中
/// Placement of a page inside a cell: scaled then centred
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
  /// 缩放系数
  /// Scale factor
  pub scale: f64,
  /// 缩放内容左下角的 x 坐标（点）
  /// X of the scaled content's lower-left corner, in points
  pub x: f64,
  /// 缩放内容左下角的 y 坐标（点）
  /// Y of the scaled content's lower-left corner, in points
  pub y: f64,
}

/// 计算页面在槽位中的落位
/// Compute the placement of a page in a slot
pub fn place_in_cell(page_w: f64, page_h: f64, cell: CellRect) -> Placement {
  let scale = fit_scale(page_w, page_h, cell.width, cell.height);
  let scaled_w = page_w * scale;
  let scaled_h = page_h * scale;
  Placement {
    scale,
    x: cell.x + (cell.width - scaled_w) / 2.0,
    y: cell.y + (cell.height - scaled_h) / 2.0,
  }
}
