//! 拼版引擎模块
//! Imposition engine module
//!
//! 把一批输入 PDF 的页面按行优先顺序排进 2×4 网格的 A4 纸，
//! 产出单个合成 PDF；源页面以 Form XObject 嵌入，矢量内容不栅格化
//! Lays the pages of a batch of input PDFs into a 2x4 grid on A4 sheets in
//! row-major order, producing one composite PDF; source pages are embedded
//! as Form XObjects so vector content is never rasterized

mod layout;
mod xobject;

pub use layout::{fit_scale, place_in_cell, CellRect, LayoutConfig, Placement, MM_TO_PT};
pub use xobject::{embed_page, page_geometry, PageGeometry};

use crate::error::{Error, Result};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// 一个输入 PDF：显示名加字节流
/// One input PDF: display name plus its bytes
#[derive(Debug, Clone)]
pub struct ComposeInput {
  pub name: String,
  pub data: Vec<u8>,
}

impl ComposeInput {
  pub fn new<S: Into<String>>(name: S, data: Vec<u8>) -> Self {
    Self {
      name: name.into(),
      data,
    }
  }
}

/// 页面落位进度回调：(已落位页数, 总页数)
/// Page placement progress callback: (pages placed, total pages)
pub type ProgressFn<'a> = &'a (dyn Fn(usize, usize) + Send + Sync);

/// 合成一批输入 PDF 为单个拼版 PDF
/// Compose a batch of input PDFs into a single imposed PDF
///
/// 页面顺序：先按输入顺序，再按输入内的页序。取消检查发生在
/// 相邻页面之间；取消时不产出部分结果
/// Page order: input order first, then page order within each input. The
/// cancellation check happens between pages; no partial output is produced
/// on cancel
pub fn compose(
  inputs: &[ComposeInput],
  cfg: &LayoutConfig,
  memory_ceiling: u64,
  progress: ProgressFn<'_>,
  cancel: &CancellationToken,
) -> Result<Vec<u8>> {
  if inputs.is_empty() {
    return Err(Error::EmptyBatch);
  }
  let aggregate: u64 = inputs.iter().map(|input| input.data.len() as u64).sum();
  if aggregate > memory_ceiling {
    return Err(Error::oversize(format!(
      "aggregate input of {aggregate} bytes exceeds the {memory_ceiling} byte ceiling"
    )));
  }

  // 解析全部输入；首个坏文件中止整个任务
  // Parse every input; the first bad file aborts the whole job
  let mut sources = Vec::with_capacity(inputs.len());
  for input in inputs {
    let doc =
      Document::load_mem(&input.data).map_err(|_| Error::bad_input(input.name.clone()))?;
    sources.push(doc);
  }

  // 收集 (源索引, 页对象, 几何)，保持顺序
  // Collect (source index, page object, geometry) preserving order
  let mut pages = Vec::new();
  for (source_index, source) in sources.iter().enumerate() {
    for (_, page_id) in source.get_pages() {
      let geometry = page_geometry(source, page_id)
        .map_err(|_| Error::bad_input(inputs[source_index].name.clone()))?;
      pages.push((source_index, page_id, geometry));
    }
  }
  if pages.is_empty() {
    return Err(Error::EmptyBatch);
  }

  let slots = cfg.slots_per_sheet();
  let sheet_count = cfg.sheets_needed(pages.len());
  let sheet_width = (cfg.page_width_mm * MM_TO_PT) as f32;
  let sheet_height = (cfg.page_height_mm * MM_TO_PT) as f32;

  let mut output = Document::with_version("1.5");
  let pages_id = output.new_object_id();
  let mut caches: Vec<HashMap<ObjectId, ObjectId>> =
    (0..sources.len()).map(|_| HashMap::new()).collect();

  let total = pages.len();
  let mut placed = 0usize;
  let mut kids = Vec::with_capacity(sheet_count);

  for sheet in 0..sheet_count {
    let mut ops = String::new();
    let mut xobjects = Dictionary::new();

    for slot in 0..slots {
      let page_index = sheet * slots + slot;
      let Some(&(source_index, page_id, geometry)) = pages.get(page_index) else {
        // 最后一张纸允许留空槽位
        // The final sheet may leave slots blank
        break;
      };
      if cancel.is_cancelled() {
        return Err(Error::Cancelled);
      }

      let cell = cfg.cell_rect_pt(slot);
      let placement = place_in_cell(geometry.width, geometry.height, cell);
      // BBox 原点非零时在落位平移中抵消
      // A non-zero BBox origin is cancelled out in the placement translation
      let tx = placement.x - geometry.origin_x * placement.scale;
      let ty = placement.y - geometry.origin_y * placement.scale;

      let name = format!("P{slot}");
      let xobject_id = embed_page(
        &mut output,
        &sources[source_index],
        page_id,
        &mut caches[source_index],
      )?;
      xobjects.set(name.as_bytes(), Object::Reference(xobject_id));
      ops.push_str(&format!(
        "q {:.6} 0 0 {:.6} {:.4} {:.4} cm /{} Do Q\n",
        placement.scale, placement.scale, tx, ty, name
      ));

      placed += 1;
      progress(placed, total);
    }

    let content_id = output.add_object(Stream::new(Dictionary::new(), ops.into_bytes()));
    let mut resources = Dictionary::new();
    resources.set("XObject", Object::Dictionary(xobjects));

    let mut page_dict = Dictionary::new();
    page_dict.set("Type", Object::Name(b"Page".to_vec()));
    page_dict.set("Parent", Object::Reference(pages_id));
    page_dict.set(
      "MediaBox",
      Object::Array(vec![
        Object::Integer(0),
        Object::Integer(0),
        Object::Real(sheet_width),
        Object::Real(sheet_height),
      ]),
    );
    page_dict.set("Contents", Object::Reference(content_id));
    page_dict.set("Resources", Object::Dictionary(resources));
    kids.push(Object::Reference(output.add_object(page_dict)));
  }

  let mut pages_dict = Dictionary::new();
  pages_dict.set("Type", Object::Name(b"Pages".to_vec()));
  pages_dict.set("Count", Object::Integer(kids.len() as i64));
  pages_dict.set("Kids", Object::Array(kids));
  output.objects.insert(pages_id, Object::Dictionary(pages_dict));

  let mut catalog = Dictionary::new();
  catalog.set("Type", Object::Name(b"Catalog".to_vec()));
  catalog.set("Pages", Object::Reference(pages_id));
  let catalog_id = output.add_object(catalog);
  output.trailer.set("Root", Object::Reference(catalog_id));
  output.compress();

  let mut buffer = Vec::new();
  output.save_to(&mut buffer)?;
  tracing::debug!(
    pages = total,
    sheets = sheet_count,
    bytes = buffer.len(),
    "composed imposition output"
  );
  Ok(buffer)
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Mutex;

  /// 构造一个 n 页的最小 PDF
  /// Build a minimal n-page PDF
  pub(crate) fn sample_pdf(page_count: usize, width: i64, height: i64) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids = Vec::new();
    for index in 0..page_count {
      let content = format!("0 0 {} {} re S % page {index}\n", width / 2, height / 2);
      let content_id = doc.add_object(Stream::new(Dictionary::new(), content.into_bytes()));
      let mut page = Dictionary::new();
      page.set("Type", Object::Name(b"Page".to_vec()));
      page.set("Parent", Object::Reference(pages_id));
      page.set(
        "MediaBox",
        Object::Array(vec![
          Object::Integer(0),
          Object::Integer(0),
          Object::Integer(width),
          Object::Integer(height),
        ]),
      );
      page.set("Contents", Object::Reference(content_id));
      kids.push(Object::Reference(doc.add_object(page)));
    }
    let mut pages = Dictionary::new();
    pages.set("Type", Object::Name(b"Pages".to_vec()));
    pages.set("Count", Object::Integer(page_count as i64));
    pages.set("Kids", Object::Array(kids));
    doc.objects.insert(pages_id, Object::Dictionary(pages));
    let mut catalog = Dictionary::new();
    catalog.set("Type", Object::Name(b"Catalog".to_vec()));
    catalog.set("Pages", Object::Reference(pages_id));
    let catalog_id = doc.add_object(catalog);
    doc.trailer.set("Root", Object::Reference(catalog_id));
    let mut buffer = Vec::new();
    doc.save_to(&mut buffer).unwrap();
    buffer
  }

  fn placements_per_sheet(output: &[u8]) -> Vec<usize> {
    let doc = Document::load_mem(output).unwrap();
    doc
      .get_pages()
      .values()
      .map(|&page_id| {
        let content = doc.get_page_content(page_id).unwrap();
        let text = String::from_utf8_lossy(&content);
        text.matches(" Do").count()
      })
      .collect()
  }

  fn no_progress(_: usize, _: usize) {}

  #[test]
  fn test_single_input_three_pages_one_sheet() {
    let input = ComposeInput::new("invoice.pdf", sample_pdf(3, 300, 400));
    let output = compose(
      &[input],
      &LayoutConfig::default(),
      u64::MAX,
      &no_progress,
      &CancellationToken::new(),
    )
    .unwrap();

    let filled = placements_per_sheet(&output);
    assert_eq!(filled, vec![3]);
  }

  #[test]
  fn test_two_inputs_nine_pages_two_sheets() {
    let inputs = vec![
      ComposeInput::new("a.pdf", sample_pdf(5, 300, 400)),
      ComposeInput::new("b.pdf", sample_pdf(4, 300, 400)),
    ];
    let output = compose(
      &inputs,
      &LayoutConfig::default(),
      u64::MAX,
      &no_progress,
      &CancellationToken::new(),
    )
    .unwrap();

    // 第一张填满 8 格，第二张只有左上角 1 格
    // Sheet one is fully filled, sheet two has one cell at the top-left
    let filled = placements_per_sheet(&output);
    assert_eq!(filled, vec![8, 1]);
  }

  #[test]
  fn test_sheet_count_matches_formula() {
    for pages in [1usize, 8, 9, 16, 17] {
      let input = ComposeInput::new("n.pdf", sample_pdf(pages, 200, 300));
      let output = compose(
        &[input],
        &LayoutConfig::default(),
        u64::MAX,
        &no_progress,
        &CancellationToken::new(),
      )
      .unwrap();
      let doc = Document::load_mem(&output).unwrap();
      assert_eq!(doc.get_pages().len(), pages.div_ceil(8), "pages={pages}");
    }
  }

  #[test]
  fn test_empty_batch() {
    let result = compose(
      &[],
      &LayoutConfig::default(),
      u64::MAX,
      &no_progress,
      &CancellationToken::new(),
    );
    assert!(matches!(result, Err(Error::EmptyBatch)));
  }

  #[test]
  fn test_bad_input_names_first_bad_file() {
    let inputs = vec![
      ComposeInput::new("good.pdf", sample_pdf(1, 300, 400)),
      ComposeInput::new("broken.pdf", b"this is not a pdf".to_vec()),
    ];
    let result = compose(
      &inputs,
      &LayoutConfig::default(),
      u64::MAX,
      &no_progress,
      &CancellationToken::new(),
    );
    match result {
      Err(Error::BadInput { file }) => assert_eq!(file, "broken.pdf"),
      other => panic!("expected BadInput, got {other:?}"),
    }
  }

  #[test]
  fn test_oversize_ceiling() {
    let input = ComposeInput::new("big.pdf", sample_pdf(1, 300, 400));
    let result = compose(
      &[input],
      &LayoutConfig::default(),
      16,
      &no_progress,
      &CancellationToken::new(),
    );
    assert!(matches!(result, Err(Error::Oversize { .. })));
  }

  #[test]
  fn test_cancelled_before_placement() {
    let token = CancellationToken::new();
    token.cancel();
    let input = ComposeInput::new("a.pdf", sample_pdf(2, 300, 400));
    let result = compose(
      &[input],
      &LayoutConfig::default(),
      u64::MAX,
      &no_progress,
      &token,
    );
    assert!(matches!(result, Err(Error::Cancelled)));
  }

  #[test]
  fn test_progress_reports_every_page() {
    let seen: Mutex<Vec<(usize, usize)>> = Mutex::new(Vec::new());
    let progress = |done: usize, total: usize| {
      seen.lock().unwrap().push((done, total));
    };
    let input = ComposeInput::new("a.pdf", sample_pdf(3, 300, 400));
    compose(
      &[input],
      &LayoutConfig::default(),
      u64::MAX,
      &progress,
      &CancellationToken::new(),
    )
    .unwrap();

    let seen = seen.into_inner().unwrap();
    assert_eq!(seen, vec![(1, 3), (2, 3), (3, 3)]);
  }

  #[test]
  fn test_custom_grid() {
    let cfg = LayoutConfig {
      columns: 1,
      rows: 2,
      ..LayoutConfig::default()
    };
    let input = ComposeInput::new("a.pdf", sample_pdf(3, 300, 400));
    let output = compose(&[input], &cfg, u64::MAX, &no_progress, &CancellationToken::new()).unwrap();
    let filled = placements_per_sheet(&output);
    assert_eq!(filled, vec![2, 1]);
  }
}
