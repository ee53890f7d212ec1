//! `iXML` / `axml` 嵌入式 XML 块.

use mediatag_core::{FieldMap, TagError, TagResult};
use xml::reader::{EventReader, ParserConfig, XmlEvent};

fn reader(data: &[u8]) -> EventReader<&[u8]> {
    // 块尾常见 NUL 填充
    let end = data.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    ParserConfig::new()
        .trim_whitespace(true)
        .cdata_to_characters(true)
        .create_reader(&data[..end])
}

fn xml_error(err: xml::reader::Error) -> TagError {
    TagError::Malformed(format!("XML 解析失败: {err}"))
}

/// 把 iXML 文档展开为扁平字段表
///
/// 键为叶子元素名, 重复出现的元素累积为列表. 根元素 (`BWFXML`) 本身不产生字段.
pub fn decode_ixml(data: &[u8], max_text_len: usize) -> TagResult<FieldMap> {
    let mut out = FieldMap::new();
    let mut stack: Vec<String> = Vec::new();
    let mut text = String::new();

    for event in reader(data) {
        match event.map_err(xml_error)? {
            XmlEvent::StartElement { name, .. } => {
                stack.push(name.local_name);
                text.clear();
            }
            XmlEvent::Characters(chars) => text.push_str(&chars),
            XmlEvent::EndElement { .. } => {
                let element = stack.pop();
                let value = std::mem::take(&mut text);
                if let Some(element) = element {
                    if !stack.is_empty() && !value.is_empty() {
                        out.push(element, clip(value, max_text_len));
                    }
                }
            }
            _ => {}
        }
    }
    Ok(out)
}

fn clip(mut value: String, max_len: usize) -> String {
    if value.len() > max_len {
        let mut cut = max_len;
        while !value.is_char_boundary(cut) {
            cut -= 1;
        }
        value.truncate(cut);
    }
    value
}

/// 识别 `axml` 文档的根元素 (如 EBU Core 的 `ebuCoreMain`)
pub fn axml_root(data: &[u8]) -> TagResult<FieldMap> {
    for event in reader(data) {
        if let XmlEvent::StartElement { name, .. } = event.map_err(xml_error)? {
            let mut out = FieldMap::new();
            out.insert("root", name.local_name);
            out.insert_opt("namespace", name.namespace);
            return Ok(out);
        }
    }
    Err(TagError::Malformed("axml 中没有根元素".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const IXML: &str = "<?xml version=\"1.0\"?>\n<BWFXML><IXML_VERSION>2.10</IXML_VERSION>\
        <PROJECT>Documentary</PROJECT><SCENE>12A</SCENE><TAKE>3</TAKE>\
        <TRACK_LIST><TRACK><NAME>Boom</NAME></TRACK><TRACK><NAME>Lav</NAME></TRACK></TRACK_LIST>\
        </BWFXML>\0\0";

    #[test]
    fn test_ixml_扁平化() {
        let out = decode_ixml(IXML.as_bytes(), 1024).unwrap();
        assert_eq!(out.get_str("PROJECT"), Some("Documentary"));
        assert_eq!(out.get_str("SCENE"), Some("12A"));
        let names = out.get_list("NAME").unwrap();
        assert_eq!(names.len(), 2);
        assert_eq!(names[1].as_str(), Some("Lav"));
        assert!(!out.contains_key("BWFXML"));
    }

    #[test]
    fn test_ixml_格式错误() {
        assert!(decode_ixml(b"<BWFXML><SCENE>1</BWFXML>", 1024).is_err());
    }

    #[test]
    fn test_axml_根元素() {
        let doc = concat!(
            "<ebuCoreMain xmlns=\"urn:ebu:metadata-schema:ebucore\">",
            "<coreMetadata/></ebuCoreMain>"
        )
        .as_bytes();
        let out = axml_root(doc).unwrap();
        assert_eq!(out.get_str("root"), Some("ebuCoreMain"));
        assert_eq!(
            out.get_str("namespace"),
            Some("urn:ebu:metadata-schema:ebucore")
        );
    }
}
