//! 源页面嵌入模块
//! Source page embedding module
//!
//! 把源 PDF 页面转换为输出文档中的 Form XObject，内容保持矢量；
//! 同一源对象通过缓存避免重复拷贝
//! Turns source PDF pages into Form XObjects in the output document, keeping
//! the content vector; a cache avoids copying the same source object twice

use crate::error::Result;
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use std::collections::HashMap;

/// 源页面的几何信息
/// Geometry of a source page
#[derive(Debug, Clone, Copy)]
pub struct PageGeometry {
  /// MediaBox 左下角
  /// Lower-left corner of the MediaBox
  pub origin_x: f64,
  pub origin_y: f64,
  /// 页面宽高（点）
  /// Page width and height, in points
  pub width: f64,
  pub height: f64,
}

/// 读取页面的 MediaBox 几何
/// Read the MediaBox geometry of a page
pub fn page_geometry(doc: &Document, page_id: ObjectId) -> Result<PageGeometry> {
  let page_dict = doc.get_dictionary(page_id)?;
  let media_box = resolve_media_box(doc, page_dict);
  let numbers: Vec<f64> = media_box
    .iter()
    .map(object_number)
    .collect();
  if numbers.len() == 4 {
    let (x0, y0, x1, y1) = (numbers[0], numbers[1], numbers[2], numbers[3]);
    Ok(PageGeometry {
      origin_x: x0.min(x1),
      origin_y: y0.min(y1),
      width: (x1 - x0).abs(),
      height: (y1 - y0).abs(),
    })
  } else {
    // 没有可用的 MediaBox 时按 A4 处理
    // Treat pages without a usable MediaBox as A4
    Ok(PageGeometry {
      origin_x: 0.0,
      origin_y: 0.0,
      width: 595.0,
      height: 842.0,
    })
  }
}

/// MediaBox 可能挂在祖先 Pages 节点上
/// The MediaBox may live on an ancestor Pages node
fn resolve_media_box(doc: &Document, page_dict: &Dictionary) -> Vec<Object> {
  let mut current = page_dict.clone();
  loop {
    if let Ok(array) = current.get(b"MediaBox").and_then(|obj| resolved(doc, obj).as_array()) {
      return array.clone();
    }
    match current
      .get(b"Parent")
      .ok()
      .and_then(|obj| obj.as_reference().ok())
      .and_then(|id| doc.get_dictionary(id).ok())
    {
      Some(parent) => current = parent.clone(),
      None => return Vec::new(),
    }
  }
}

fn resolved<'a>(doc: &'a Document, obj: &'a Object) -> &'a Object {
  match obj {
    Object::Reference(id) => doc.get_object(*id).unwrap_or(obj),
    other => other,
  }
}

fn object_number(obj: &Object) -> f64 {
  match obj {
    Object::Integer(value) => *value as f64,
    Object::Real(value) => *value as f64,
    Object::Reference(_) => 0.0,
    _ => 0.0,
  }
}

/// 把一个源页面做成输出文档中的 Form XObject
/// Make a Form XObject in the output document from one source page
pub fn embed_page(
  output: &mut Document,
  source: &Document,
  page_id: ObjectId,
  cache: &mut HashMap<ObjectId, ObjectId>,
) -> Result<ObjectId> {
  let page_dict = source.get_dictionary(page_id)?;
  let media_box = resolve_media_box(source, page_dict);
  let bbox = if media_box.len() == 4 {
    media_box
  } else {
    vec![
      Object::Integer(0),
      Object::Integer(0),
      Object::Integer(595),
      Object::Integer(842),
    ]
  };

  let content = collect_page_content(source, page_dict)?;

  let mut xobject_dict = Dictionary::new();
  xobject_dict.set("Type", Object::Name(b"XObject".to_vec()));
  xobject_dict.set("Subtype", Object::Name(b"Form".to_vec()));
  xobject_dict.set("FormType", Object::Integer(1));
  xobject_dict.set("BBox", Object::Array(bbox));
  if let Ok(resources) = page_dict.get(b"Resources") {
    xobject_dict.set("Resources", copy_deep(output, source, resources, cache)?);
  }

  Ok(output.add_object(Stream::new(xobject_dict, content)))
}

/// 汇集页面的内容流（可能是单个引用或引用数组）
/// Collect the page's content stream (a single reference or an array of them)
fn collect_page_content(doc: &Document, page_dict: &Dictionary) -> Result<Vec<u8>> {
  let contents = match page_dict.get(b"Contents") {
    Ok(contents) => contents,
    // 无内容即空白页
    // No content means a blank page
    Err(_) => return Ok(Vec::new()),
  };
  let mut data = Vec::new();
  match contents {
    Object::Reference(id) => append_stream(doc, *id, &mut data)?,
    Object::Array(refs) => {
      for item in refs {
        if let Object::Reference(id) = item {
          append_stream(doc, *id, &mut data)?;
          data.push(b'\n');
        }
      }
    }
    _ => {}
  }
  Ok(data)
}

fn append_stream(doc: &Document, id: ObjectId, data: &mut Vec<u8>) -> Result<()> {
  if let Ok(stream) = doc.get_object(id)?.as_stream() {
    let content = stream
      .decompressed_content()
      .unwrap_or_else(|_| stream.content.clone());
    data.extend_from_slice(&content);
  }
  Ok(())
}

/// 递归拷贝对象到输出文档，引用经缓存去重
/// Recursively copy an object into the output document, deduplicating
/// references through the cache
fn copy_deep(
  output: &mut Document,
  source: &Document,
  obj: &Object,
  cache: &mut HashMap<ObjectId, ObjectId>,
) -> Result<Object> {
  match obj {
    Object::Reference(id) => {
      if let Some(&mapped) = cache.get(id) {
        return Ok(Object::Reference(mapped));
      }
      // 先占位再拷贝，避免自引用对象造成无限递归
      // Reserve the slot before copying so self-referencing objects
      // cannot recurse forever
      let reserved = output.new_object_id();
      cache.insert(*id, reserved);
      let copied = copy_deep(output, source, source.get_object(*id)?, cache)?;
      output.objects.insert(reserved, copied);
      Ok(Object::Reference(reserved))
    }
    Object::Dictionary(dict) => {
      let mut copied = Dictionary::new();
      for (key, value) in dict.iter() {
        copied.set(key.clone(), copy_deep(output, source, value, cache)?);
      }
      Ok(Object::Dictionary(copied))
    }
    Object::Array(items) => {
      let copied: Result<Vec<Object>> = items
        .iter()
        .map(|item| copy_deep(output, source, item, cache))
        .collect();
      Ok(Object::Array(copied?))
    }
    Object::Stream(stream) => {
      let mut copied_dict = Dictionary::new();
      for (key, value) in stream.dict.iter() {
        copied_dict.set(key.clone(), copy_deep(output, source, value, cache)?);
      }
      Ok(Object::Stream(Stream {
        dict: copied_dict,
        content: stream.content.clone(),
        allows_compression: stream.allows_compression,
        start_position: None,
      }))
    }
    other => Ok(other.clone()),
  }
}
