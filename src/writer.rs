/*!
 * XML serialization with size-bounded chunking
 *
 * Every chunk is a complete document: declaration, root element, and for the first chunk the
 * prompt and the `<structure>` section. File blocks are rendered once and appended to the
 * current chunk until the next block would push it past the byte budget.
 */

use std::borrow::Cow;
use std::collections::HashSet;
use std::io::{self, Write};

use log::{debug, info};
use quick_xml::events::{BytesCData, BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::Writer;

use crate::config::ProcessingOptions;
use crate::error::Result;
use crate::paths;
use crate::types::{FileContent, FileRecord, FolderRecord, ProcessingResult, XmlChunk};

const INDENT: usize = 2;
const FILES_OPEN: &str = "\n  <files>";
const FILES_CLOSE: &str = "\n  </files>";

/// Serializes a [`ProcessingResult`] into XML chunks
#[derive(Debug, Clone)]
pub struct XmlSerializer {
    root_tag: String,
    include_empty_folders: bool,
}

impl XmlSerializer {
    /// Create a serializer with an explicit root element name
    pub fn new(root_tag: impl Into<String>, include_empty_folders: bool) -> Self {
        Self {
            root_tag: root_tag.into(),
            include_empty_folders,
        }
    }

    /// Create a serializer from processing options
    pub fn from_options(options: &ProcessingOptions) -> Self {
        Self::new(options.root_tag.clone(), options.include_empty_folders)
    }

    /// Serialize `result` into chunks of at most `budget` bytes (a single file block may overflow)
    pub fn serialize(&self, result: &ProcessingResult, budget: usize) -> Result<Vec<XmlChunk>> {
        validate(result)?;

        let total_files = result.files.len();
        let widest = (total_files + 1).to_string().len();
        let reserve = " chunk=\"/\"".len() + 2 * widest;

        let mut finished: Vec<FinishedChunk> = Vec::new();
        let mut current = ChunkBuffer::start(&self.root_tag)?;
        self.write_header(&mut current, result)?;

        for file in &result.files {
            let block = render_file_block(file)?;

            if current.has_payload() && current.projected_len(block.len()) + reserve > budget {
                debug!(
                    "Chunk {} full at {} bytes",
                    finished.len() + 1,
                    current.len()
                );
                finished.push(current.finish()?);
                current = ChunkBuffer::start(&self.root_tag)?;
            }

            current.push_file(&block)?;
        }
        finished.push(current.finish()?);

        let total_chunks = finished.len();
        let mut files_processed = 0;
        let mut chunks = Vec::with_capacity(total_chunks);

        for (index, chunk) in finished.into_iter().enumerate() {
            let chunk_number = index + 1;
            let mut bytes = chunk.bytes;
            if total_chunks > 1 {
                let attribute = format!(" chunk=\"{}/{}\"", chunk_number, total_chunks);
                let tail = bytes.split_off(chunk.root_insert_at);
                bytes.extend_from_slice(attribute.as_bytes());
                bytes.extend_from_slice(&tail);
            }

            files_processed += chunk.files;
            let content = String::from_utf8(bytes)
                .map_err(|e| crate::error!(Serialization, "chunk {} is not UTF-8: {}", chunk_number, e))?;

            chunks.push(XmlChunk {
                content,
                chunk_number,
                total_chunks,
                files_processed,
                total_files,
            });
        }

        info!(
            "Serialized {} files into {} chunk(s)",
            total_files, total_chunks
        );
        Ok(chunks)
    }

    /// Prompt and structure, written to the first chunk only
    fn write_header(&self, chunk: &mut ChunkBuffer<'_>, result: &ProcessingResult) -> Result<()> {
        let writer = &mut chunk.writer;

        if let Some(prompt) = &result.prompt {
            writer.write_event(Event::Start(BytesStart::new("prompt")))?;
            write_cdata(writer, prompt)?;
            writer.write_event(Event::End(BytesEnd::new("prompt")))?;
            chunk.has_header = true;
        }

        let root_files: Vec<&FileRecord> = result
            .files
            .iter()
            .filter(|file| paths::parent_of(&file.path).is_empty())
            .collect();
        let folders: Vec<&FolderRecord> = result
            .structure
            .iter()
            .filter(|folder| self.include_empty_folders || folder.has_files())
            .collect();

        if root_files.is_empty() && folders.is_empty() {
            return Ok(());
        }

        writer.write_event(Event::Start(BytesStart::new("structure")))?;
        for file in root_files {
            writer.write_event(Event::Empty(file_start(file)))?;
        }
        for folder in folders {
            self.write_folder(writer, folder)?;
        }
        writer.write_event(Event::End(BytesEnd::new("structure")))?;
        chunk.has_header = true;

        Ok(())
    }

    fn write_folder<W: Write>(&self, writer: &mut Writer<W>, folder: &FolderRecord) -> io::Result<()> {
        let mut start = BytesStart::new("folder");
        start.push_attribute(("name", &*sanitize(&folder.name)));
        start.push_attribute(("path", &*sanitize(&folder.path)));
        if folder.truncated {
            start.push_attribute(("truncated", "true"));
        }

        let children: Vec<&FolderRecord> = folder
            .folders
            .iter()
            .filter(|child| self.include_empty_folders || child.has_files())
            .collect();

        if folder.files.is_empty() && children.is_empty() {
            return writer.write_event(Event::Empty(start));
        }

        writer.write_event(Event::Start(start))?;
        for file in &folder.files {
            writer.write_event(Event::Empty(file_start(file)))?;
        }
        for child in children {
            self.write_folder(writer, child)?;
        }
        writer.write_event(Event::End(BytesEnd::new("folder")))
    }
}

/// One chunk under construction
struct ChunkBuffer<'a> {
    writer: Writer<Vec<u8>>,
    root_tag: &'a str,
    root_insert_at: usize,
    files: usize,
    files_open: bool,
    has_header: bool,
}

/// Bytes of a closed chunk plus what finalization needs
struct FinishedChunk {
    bytes: Vec<u8>,
    root_insert_at: usize,
    files: usize,
}

impl<'a> ChunkBuffer<'a> {
    fn start(root_tag: &'a str) -> Result<Self> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', INDENT);
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        writer.write_event(Event::Start(BytesStart::new(root_tag)))?;
        // Just before the closing '>' of the root start tag
        let root_insert_at = writer.get_ref().len() - 1;

        Ok(Self {
            writer,
            root_tag,
            root_insert_at,
            files: 0,
            files_open: false,
            has_header: false,
        })
    }

    fn len(&self) -> usize {
        self.writer.get_ref().len()
    }

    /// Whether closing this chunk now would leave something in it
    fn has_payload(&self) -> bool {
        self.files > 0 || self.has_header
    }

    /// Length of the finished chunk if a block of `block_len` bytes were added
    fn projected_len(&self, block_len: usize) -> usize {
        let open = if self.files_open { 0 } else { FILES_OPEN.len() };
        let close = FILES_CLOSE.len() + "\n</>\n".len() + self.root_tag.len();
        self.len() + open + block_len + close
    }

    fn push_file(&mut self, block: &[u8]) -> Result<()> {
        if !self.files_open {
            self.writer
                .write_event(Event::Start(BytesStart::new("files")))?;
            self.files_open = true;
        }

        self.writer.get_mut().extend_from_slice(block);
        self.files += 1;
        Ok(())
    }

    fn finish(mut self) -> Result<FinishedChunk> {
        if self.files_open {
            self.writer.write_event(Event::End(BytesEnd::new("files")))?;
        }
        self.writer
            .write_event(Event::End(BytesEnd::new(self.root_tag)))?;

        let mut bytes = self.writer.into_inner();
        bytes.push(b'\n');

        Ok(FinishedChunk {
            bytes,
            root_insert_at: self.root_insert_at,
            files: self.files,
        })
    }
}

/// Render one `<file>` block as it appears nested inside `<files>`
fn render_file_block(file: &FileRecord) -> io::Result<Vec<u8>> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', INDENT);
    // Two enclosing levels give the block its final indentation
    writer.write_event(Event::Start(BytesStart::new("r")))?;
    writer.write_event(Event::Start(BytesStart::new("f")))?;
    let prefix = writer.get_ref().len();

    writer.write_event(Event::Start(file_start(file)))?;
    if let Some(summary) = &file.summary {
        writer.write_event(Event::Start(BytesStart::new("summary")))?;
        write_cdata(&mut writer, summary)?;
        writer.write_event(Event::End(BytesEnd::new("summary")))?;
    }

    match &file.content {
        FileContent::Text(text) => {
            writer.write_event(Event::Start(BytesStart::new("content")))?;
            write_cdata(&mut writer, text)?;
        }
        FileContent::Elided(reason) => {
            let mut start = BytesStart::new("content");
            let reason: &str = reason.as_ref();
            start.push_attribute(("elided", reason));
            writer.write_event(Event::Start(start))?;
            write_cdata(&mut writer, "")?;
        }
    }
    writer.write_event(Event::End(BytesEnd::new("content")))?;
    writer.write_event(Event::End(BytesEnd::new("file")))?;

    let mut bytes = writer.into_inner();
    bytes.drain(..prefix);
    Ok(bytes)
}

fn file_start(file: &FileRecord) -> BytesStart<'static> {
    let mut start = BytesStart::new("file");
    start.push_attribute(("name", &*sanitize(&file.name)));
    start.push_attribute(("path", &*sanitize(&file.path)));
    start
}

/// Write `text` as CDATA, splitting every `]]>` across two adjacent sections
fn write_cdata<W: Write>(writer: &mut Writer<W>, text: &str) -> io::Result<()> {
    let clean = sanitize(text);
    if !clean.contains("]]>") {
        return writer.write_event(Event::CData(BytesCData::new(clean)));
    }

    let pieces: Vec<&str> = clean.split("]]>").collect();
    let last = pieces.len() - 1;
    for (index, piece) in pieces.iter().enumerate() {
        let mut section = String::with_capacity(piece.len() + 3);
        if index > 0 {
            section.push('>');
        }
        section.push_str(piece);
        if index < last {
            section.push_str("]]");
        }
        writer.write_event(Event::CData(BytesCData::new(section)))?;
    }

    Ok(())
}

fn is_xml_char(c: char) -> bool {
    matches!(
        c,
        '\t' | '\n' | '\r' | '\u{20}'..='\u{D7FF}' | '\u{E000}'..='\u{FFFD}' | '\u{10000}'..='\u{10FFFF}'
    )
}

/// Normalize line endings to `\n` and replace characters XML 1.0 cannot carry with U+FFFD
pub fn sanitize(text: &str) -> Cow<'_, str> {
    if !text.chars().any(|c| c == '\r' || !is_xml_char(c)) {
        return Cow::Borrowed(text);
    }

    let normalized = text.replace("\r\n", "\n").replace('\r', "\n");
    Cow::Owned(
        normalized
            .chars()
            .map(|c| if is_xml_char(c) { c } else { '\u{FFFD}' })
            .collect(),
    )
}

/// Reject results that would produce inconsistent paths
fn validate(result: &ProcessingResult) -> Result<()> {
    let mut seen = HashSet::with_capacity(result.files.len());

    for file in &result.files {
        check_file(file, None)?;
        crate::ensure!(
            seen.insert(file.path.as_str()),
            Serialization,
            "duplicate file path {}",
            file.path
        );
    }

    fn check_folder(folder: &FolderRecord, parent: &str, files: &HashSet<&str>) -> Result<()> {
        crate::ensure!(
            !folder.path.is_empty() && !folder.name.is_empty(),
            Serialization,
            "folder with empty name or path under {:?}",
            parent
        );
        crate::ensure!(
            paths::file_name(&folder.path) == folder.name && paths::parent_of(&folder.path) == parent,
            Serialization,
            "folder {} (name {}) is not a child of {:?}",
            folder.path,
            folder.name,
            parent
        );

        for file in &folder.files {
            check_file(file, Some(&folder.path))?;
            crate::ensure!(
                files.contains(file.path.as_str()),
                Serialization,
                "structure references {} which is missing from the file list",
                file.path
            );
        }
        for child in &folder.folders {
            check_folder(child, &folder.path, files)?;
        }
        Ok(())
    }

    for folder in &result.structure {
        check_folder(folder, "", &seen)?;
    }

    Ok(())
}

fn check_file(file: &FileRecord, parent: Option<&str>) -> Result<()> {
    crate::ensure!(
        !file.path.is_empty() && !file.name.is_empty(),
        Serialization,
        "file record with empty name or path ({:?})",
        file
    );
    crate::ensure!(
        paths::file_name(&file.path) == file.name,
        Serialization,
        "file path {} does not end with its name {}",
        file.path,
        file.name
    );
    if let Some(parent) = parent {
        crate::ensure!(
            paths::parent_of(&file.path) == parent,
            Serialization,
            "file {} listed under folder {}",
            file.path,
            parent
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RepoPromptError;
    use crate::types::ElisionReason;
    use quick_xml::Reader;
    use std::path::PathBuf;

    fn file(path: &str, text: &str) -> FileRecord {
        FileRecord {
            name: paths::file_name(path).to_string(),
            path: path.to_string(),
            size: text.len() as u64,
            content: FileContent::Text(text.to_string()),
            summary: None,
            ignored: false,
        }
    }

    fn result(files: Vec<FileRecord>, structure: Vec<FolderRecord>) -> ProcessingResult {
        ProcessingResult {
            structure,
            files,
            root_path: PathBuf::from("/p"),
            prompt: None,
            skipped: Vec::new(),
        }
    }

    /// Text of every `<content>` element in document order, CDATA sections joined
    fn contents(xml: &str) -> Vec<String> {
        let mut reader = Reader::from_str(xml);
        let mut out = Vec::new();
        let mut current: Option<String> = None;

        loop {
            match reader.read_event().unwrap() {
                Event::Start(e) if e.name().as_ref() == b"content" => current = Some(String::new()),
                Event::CData(e) => {
                    if let Some(text) = current.as_mut() {
                        text.push_str(std::str::from_utf8(&e.into_inner()).unwrap());
                    }
                }
                Event::End(e) if e.name().as_ref() == b"content" => {
                    out.extend(current.take());
                }
                Event::Eof => break,
                _ => {}
            }
        }
        out
    }

    #[test]
    fn test_single_file_document() {
        let mut record = file("a.txt", "hello");
        record.summary = Some("hello".to_string());

        let chunks = XmlSerializer::new("project", false)
            .serialize(&result(vec![record], Vec::new()), 1 << 20)
            .unwrap();

        assert_eq!(chunks.len(), 1);
        let xml = &chunks[0].content;
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<project>"));
        assert_eq!(xml.matches("<file name=\"a.txt\" path=\"a.txt\">").count(), 1);
        assert!(xml.contains("<file name=\"a.txt\" path=\"a.txt\"/>"));
        assert!(xml.contains("<content><![CDATA[hello]]></content>"));
        assert!(xml.contains("<summary><![CDATA[hello]]></summary>"));
        assert!(!xml.contains("chunk="));
        assert_eq!(chunks[0].chunk_number, 1);
        assert_eq!(chunks[0].total_chunks, 1);
        assert_eq!(chunks[0].files_processed, 1);
    }

    #[test]
    fn test_cdata_round_trip() {
        let samples = [
            "plain",
            "",
            "]]>",
            "a]]>b]]>c",
            "ends with ]]",
            "<tag attr=\"x\">&amp;</tag>",
            "tabs\tand\nnewlines",
        ];
        let files: Vec<FileRecord> = samples
            .iter()
            .enumerate()
            .map(|(i, text)| file(&format!("f{}.txt", i), text))
            .collect();

        let chunks = XmlSerializer::new("project", false)
            .serialize(&result(files, Vec::new()), 1 << 20)
            .unwrap();

        assert_eq!(contents(&chunks[0].content), samples.to_vec());
    }

    #[test]
    fn test_newlines_and_invalid_chars_are_normalized() {
        let chunks = XmlSerializer::new("project", false)
            .serialize(&result(vec![file("a.txt", "a\r\nb\rc\u{1}d")], Vec::new()), 1 << 20)
            .unwrap();

        assert_eq!(contents(&chunks[0].content), vec!["a\nb\nc\u{FFFD}d"]);
    }

    #[test]
    fn test_attributes_are_escaped() {
        let name = "a&b<c>\"d'.txt";
        let chunks = XmlSerializer::new("project", false)
            .serialize(&result(vec![file(name, "x")], Vec::new()), 1 << 20)
            .unwrap();

        let xml = &chunks[0].content;
        assert!(xml.contains("name=\"a&amp;b&lt;c&gt;&quot;d&apos;.txt\""));

        let mut reader = Reader::from_str(xml);
        let mut names = Vec::new();
        loop {
            match reader.read_event().unwrap() {
                Event::Start(e) | Event::Empty(e) if e.name().as_ref() == b"file" => {
                    let attr = e.try_get_attribute("path").unwrap().unwrap();
                    names.push(attr.unescape_value().unwrap().into_owned());
                }
                Event::Eof => break,
                _ => {}
            }
        }
        assert_eq!(names, vec![name, name]);
    }

    #[test]
    fn test_elided_content() {
        let mut record = file("big.bin", "");
        record.content = FileContent::Elided(ElisionReason::Binary);

        let chunks = XmlSerializer::new("project", false)
            .serialize(&result(vec![record], Vec::new()), 1 << 20)
            .unwrap();
        assert!(chunks[0]
            .content
            .contains("<content elided=\"binary\"><![CDATA[]]></content>"));
    }

    #[test]
    fn test_chunking_respects_budget() {
        let files: Vec<FileRecord> = (0..10)
            .map(|i| file(&format!("file{}.txt", i), &"x".repeat(200)))
            .collect();
        let largest_block = files
            .iter()
            .map(|f| render_file_block(f).unwrap().len())
            .max()
            .unwrap();
        let budget = 1000;

        let mut with_prompt = result(files, Vec::new());
        with_prompt.prompt = Some("  keep\n    my indentation\n".to_string());
        let chunks = XmlSerializer::new("project", false)
            .serialize(&with_prompt, budget)
            .unwrap();

        assert!(chunks.len() > 1);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_number, i + 1);
            assert_eq!(chunk.total_chunks, chunks.len());
            assert_eq!(chunk.total_files, 10);
            assert!(chunk.content.len() <= budget + largest_block);
            assert!(chunk
                .content
                .contains(&format!("<project chunk=\"{}/{}\">", i + 1, chunks.len())));
            // Every chunk parses on its own
            let mut reader = Reader::from_str(&chunk.content);
            while !matches!(reader.read_event().unwrap(), Event::Eof) {}
        }

        assert!(chunks[0]
            .content
            .contains("<prompt><![CDATA[  keep\n    my indentation\n]]></prompt>"));
        assert!(chunks[0].content.contains("<structure>"));
        assert!(!chunks[1].content.contains("<structure>"));
        assert!(!chunks[1].content.contains("<prompt>"));
        assert_eq!(chunks.last().unwrap().files_processed, 10);

        let total: usize = chunks.iter().map(|c| contents(&c.content).len()).sum();
        assert_eq!(total, 10);
    }

    #[test]
    fn test_oversized_file_gets_its_own_chunk() {
        let files = vec![
            file("a.txt", "small"),
            file("b.txt", &"y".repeat(5000)),
            file("c.txt", "small"),
        ];
        let chunks = XmlSerializer::new("project", false)
            .serialize(&result(files, Vec::new()), 800)
            .unwrap();

        let counts: Vec<usize> = chunks.iter().map(|c| contents(&c.content).len()).collect();
        assert_eq!(counts.iter().sum::<usize>(), 3);
        assert!(chunks.iter().any(|c| contents(&c.content) == vec!["y".repeat(5000)]));
    }

    #[test]
    fn test_structure_and_empty_folders() {
        let mut src = FolderRecord::new("src", "src");
        src.files.push(file("src/a.rs", "fn a() {}"));
        let mut empty = FolderRecord::new("empty", "empty");
        empty.folders.push(FolderRecord::new("inner", "empty/inner"));
        let structure = vec![empty, src];
        let files = vec![file("top.txt", "t"), file("src/a.rs", "fn a() {}")];

        let xml = XmlSerializer::new("context", false)
            .serialize(&result(files.clone(), structure.clone()), 1 << 20)
            .unwrap()
            .remove(0)
            .content;
        assert!(xml.contains("<context>"));
        assert!(!xml.contains("name=\"empty\""));
        let top = xml.find("<file name=\"top.txt\" path=\"top.txt\"/>").unwrap();
        let folder = xml.find("<folder name=\"src\" path=\"src\">").unwrap();
        assert!(top < folder);

        let xml = XmlSerializer::new("context", true)
            .serialize(&result(files, structure), 1 << 20)
            .unwrap()
            .remove(0)
            .content;
        assert!(xml.contains("<folder name=\"empty\" path=\"empty\">"));
        assert!(xml.contains("<folder name=\"inner\" path=\"empty/inner\"/>"));
    }

    #[test]
    fn test_truncated_folder_attribute() {
        let mut folder = FolderRecord::truncated("deep", "deep");
        folder.files.push(file("deep/a.txt", "a"));
        let xml = XmlSerializer::new("project", false)
            .serialize(&result(vec![file("deep/a.txt", "a")], vec![folder]), 1 << 20)
            .unwrap()
            .remove(0)
            .content;
        assert!(xml.contains("<folder name=\"deep\" path=\"deep\" truncated=\"true\">"));
    }

    #[test]
    fn test_invalid_records_are_rejected() {
        let serializer = XmlSerializer::new("project", false);

        let mut empty_path = file("a.txt", "a");
        empty_path.path = String::new();
        assert!(matches!(
            serializer.serialize(&result(vec![empty_path], Vec::new()), 1000),
            Err(RepoPromptError::Serialization(_))
        ));

        let duplicate = vec![file("a.txt", "1"), file("a.txt", "2")];
        assert!(matches!(
            serializer.serialize(&result(duplicate, Vec::new()), 1000),
            Err(RepoPromptError::Serialization(_))
        ));

        let mut folder = FolderRecord::new("src", "src");
        folder.files.push(file("src/a.rs", "a"));
        assert!(matches!(
            serializer.serialize(&result(Vec::new(), vec![folder]), 1000),
            Err(RepoPromptError::Serialization(_))
        ));
    }

    #[test]
    fn test_sanitize() {
        assert!(matches!(sanitize("clean\ttext\n"), Cow::Borrowed(_)));
        assert_eq!(sanitize("a\r\nb"), "a\nb");
        assert_eq!(sanitize("\u{0}x\u{FFFE}"), "\u{FFFD}x\u{FFFD}");
    }
}
