//! C++ replay source generation.
//!
//! Each captured frame becomes `<label>_frameNNN.cpp` holding `ReplayFrameN`. The setup calls
//! (everything the application did before the window, minus what was pruned) and the
//! bookkeeping functions go into the index files `<label>.h` and `<label>.cpp`, written once
//! when the session finishes.

mod render;

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

pub use render::{is_read_destination, HeaderStatics, Renderer, READ_BUFFER};

use crate::binary::BinaryDataStore;
use crate::call::CallCapture;
use crate::error::Result;
use crate::handle::{Handle, ResourceKind};
use crate::index::ResourceIndexTracker;

/// Pointer width of the replay target. The fixture sizes its maps in bytes.
const MAP_ENTRY_SIZE: usize = 8;

pub fn frame_file_name(label: &str, frame: u32) -> String {
    format!("{label}_frame{frame:03}.cpp")
}

pub fn header_file_name(label: &str) -> String {
    format!("{label}.h")
}

pub fn source_file_name(label: &str) -> String {
    format!("{label}.cpp")
}

/// Which calls of a list a replay function takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Activity {
    Active,
    Inactive,
}

impl Activity {
    fn takes(self, call: &CallCapture) -> bool {
        call.is_active == (self == Activity::Active)
    }
}

#[derive(Debug)]
pub struct ReplayWriter {
    out_dir: PathBuf,
    label: String,
    function_size_limit: usize,
    statics: HeaderStatics,
    ext_functions: BTreeSet<String>,
    frames: Vec<u32>,
    setup: String,
    setup_inactive: Option<String>,
    read_buffer_size: usize,
}

impl ReplayWriter {
    pub fn new(out_dir: impl Into<PathBuf>, label: impl Into<String>, function_size_limit: usize) -> Self {
        Self {
            out_dir: out_dir.into(),
            label: label.into(),
            function_size_limit: function_size_limit.max(1),
            statics: HeaderStatics::new(),
            ext_functions: BTreeSet::new(),
            frames: Vec::new(),
            setup: String::new(),
            setup_inactive: None,
            read_buffer_size: 0,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    /// Grows the fixture's read scratch buffer to hold `size` bytes.
    pub fn note_read_size(&mut self, size: usize) {
        self.read_buffer_size = self.read_buffer_size.max(size);
    }

    pub fn read_buffer_size(&self) -> usize {
        self.read_buffer_size
    }

    /// Declares a `<name>_fn <name>` static for a queried extension function.
    pub fn note_extension_function(&mut self, name: &str) {
        self.ext_functions.insert(name.to_owned());
    }

    pub fn extension_functions(&self) -> impl Iterator<Item = &str> {
        self.ext_functions.iter().map(String::as_str)
    }

    /// Replay frame numbers written so far.
    pub fn frames(&self) -> &[u32] {
        &self.frames
    }

    /// Renders the body of `name`, splitting it into `<name>PartN` functions once it holds more
    /// calls than the limit. Part functions are emitted ahead of the one calling them.
    fn render_function(
        &mut self,
        name: &str,
        calls: &[CallCapture],
        activity: Activity,
        tracker: &ResourceIndexTracker,
        store: &mut BinaryDataStore,
    ) -> Result<String> {
        let taken: Vec<&CallCapture> = calls.iter().filter(|c| activity.takes(c)).collect();
        let mut renderer = Renderer {
            tracker,
            store,
            statics: &mut self.statics,
        };

        let mut out = String::new();
        if taken.len() <= self.function_size_limit {
            writeln!(out, "void {name}(void)\n{{")?;
            for call in &taken {
                renderer.render(call, "    ", &mut out)?;
            }
            writeln!(out, "}}")?;
            return Ok(out);
        }

        let mut parts = 0;
        for chunk in taken.chunks(self.function_size_limit) {
            parts += 1;
            writeln!(out, "void {name}Part{parts}(void)\n{{")?;
            for call in chunk {
                renderer.render(call, "    ", &mut out)?;
            }
            writeln!(out, "}}\n")?;
        }
        writeln!(out, "void {name}(void)\n{{")?;
        for part in 1..=parts {
            writeln!(out, "    {name}Part{part}();")?;
        }
        writeln!(out, "}}")?;
        Ok(out)
    }

    /// Writes `<label>_frameNNN.cpp` for replay frame `frame` and returns its path.
    pub fn write_frame(
        &mut self,
        frame: u32,
        calls: &[CallCapture],
        tracker: &ResourceIndexTracker,
        store: &mut BinaryDataStore,
    ) -> Result<PathBuf> {
        let body = self.render_function(&format!("ReplayFrame{frame}"), calls, Activity::Active, tracker, store)?;
        let mut source = String::new();
        writeln!(source, "#include \"{}\"\n", header_file_name(&self.label))?;
        source.push_str(&body);

        let path = self.out_dir.join(frame_file_name(&self.label, frame));
        fs::write(&path, source)?;
        self.frames.push(frame);
        tracing::info!(frame, calls = calls.len(), path = %path.display(), "wrote replay frame");
        Ok(path)
    }

    /// Renders the setup calls into `SetupFirstFrame` (and `SetupFirstFrameInactive` when
    /// requested). Called once, when the window opens.
    pub fn set_setup_calls(
        &mut self,
        calls: &[CallCapture],
        emit_inactive: bool,
        tracker: &ResourceIndexTracker,
        store: &mut BinaryDataStore,
    ) -> Result<()> {
        self.setup = self.render_function("SetupFirstFrame", calls, Activity::Active, tracker, store)?;
        self.setup_inactive = if emit_inactive {
            Some(self.render_function("SetupFirstFrameInactive", calls, Activity::Inactive, tracker, store)?)
        } else {
            None
        };
        tracing::debug!(
            calls = calls.len(),
            inactive = calls.iter().filter(|c| !c.is_active).count(),
            "rendered setup calls"
        );
        Ok(())
    }

    /// Writes `<label>.h` and `<label>.cpp`. `reset` lists objects created before the window
    /// and still alive, in creation order.
    pub fn write_index(
        &mut self,
        tracker: &ResourceIndexTracker,
        reset: &[(ResourceKind, Handle)],
        binary_file_name: &str,
    ) -> Result<[PathBuf; 2]> {
        if self.setup.is_empty() {
            self.setup = "void SetupFirstFrame(void)\n{\n}\n".to_owned();
        }

        let header_path = self.out_dir.join(header_file_name(&self.label));
        fs::write(&header_path, self.header()?)?;
        let source_path = self.out_dir.join(source_file_name(&self.label));
        fs::write(&source_path, self.source(tracker, reset, binary_file_name)?)?;

        tracing::info!(
            header = %header_path.display(),
            source = %source_path.display(),
            frames = self.frames.len(),
            "wrote replay index"
        );
        Ok([header_path, source_path])
    }

    fn header(&self) -> Result<String> {
        let mut h = String::new();
        h.push_str("#pragma once\n\n");
        h.push_str("#define CL_NO_EXTENSION_PROTOTYPES\n");
        h.push_str("#include <CL/cl.h>\n");
        h.push_str("#include <stdint.h>\n");
        h.push_str("#include \"trace_fixture_cl.h\"\n\n");

        for name in &self.ext_functions {
            writeln!(h, "extern {name}_fn {name};")?;
        }
        if !self.ext_functions.is_empty() {
            h.push('\n');
        }
        for line in self.statics.lines() {
            writeln!(h, "{line}")?;
        }
        if !self.statics.lines().is_empty() {
            h.push('\n');
        }

        h.push_str("void InitReplay(void);\n");
        h.push_str("void SetupReplay(void);\n");
        h.push_str("void SetupFirstFrame(void);\n");
        if self.setup_inactive.is_some() {
            h.push_str("void SetupFirstFrameInactive(void);\n");
        }
        h.push_str("void ResetReplay(void);\n");
        h.push_str("void ReplayFrame(uint32_t frameIndex);\n");
        for frame in &self.frames {
            writeln!(h, "void ReplayFrame{frame}(void);")?;
        }
        Ok(h)
    }

    fn source(&self, tracker: &ResourceIndexTracker, reset: &[(ResourceKind, Handle)], binary_file_name: &str) -> Result<String> {
        let mut s = String::new();
        writeln!(s, "#include \"{}\"", header_file_name(&self.label))?;
        s.push_str("#include \"trace_fixture_cl.h\"\n\n");

        for name in &self.ext_functions {
            writeln!(s, "{name}_fn {name};")?;
        }
        if !self.ext_functions.is_empty() {
            s.push('\n');
        }

        let sizes: Vec<usize> = ResourceKind::ALL
            .iter()
            .map(|&kind| tracker.capacity(kind) * MAP_ENTRY_SIZE)
            .collect();
        s.push_str("void InitReplay(void)\n{\n");
        writeln!(s, "    // binaryDataFileName = {binary_file_name}")?;
        writeln!(s, "    // readBufferSize = {}", self.read_buffer_size)?;
        for (kind, size) in ResourceKind::ALL.iter().zip(&sizes) {
            writeln!(s, "    // {}Size = {size}", kind.map_name())?;
        }
        let sizes: Vec<String> = sizes.iter().map(usize::to_string).collect();
        writeln!(
            s,
            "    InitializeReplayCL2(\"{binary_file_name}\", 0, {}, {});",
            self.read_buffer_size,
            sizes.join(", ")
        )?;
        s.push_str("    InitializeBinaryDataLoader();\n}\n\n");

        s.push_str("void SetupReplay(void)\n{\n    InitReplay();\n}\n\n");

        s.push_str(&self.setup);
        s.push('\n');
        if let Some(inactive) = &self.setup_inactive {
            s.push_str(inactive);
            s.push('\n');
        }

        s.push_str("void ResetReplay(void)\n{\n");
        for &(kind, handle) in reset {
            if let Some(line) = render::render_reset(tracker, kind, handle) {
                writeln!(s, "    {line}")?;
            }
        }
        s.push_str("}\n\n");

        s.push_str("void ReplayFrame(uint32_t frameIndex)\n{\n    switch (frameIndex)\n    {\n");
        for frame in &self.frames {
            writeln!(s, "        case {frame}:\n            ReplayFrame{frame}();\n            break;")?;
        }
        s.push_str("        default:\n            break;\n    }\n}\n");
        Ok(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binary::{BinaryStoreOptions, Compression};
    use crate::capture::{create_context, finish, flush, release};

    fn store(dir: &Path) -> BinaryDataStore {
        BinaryDataStore::create(
            dir.join("t.bin"),
            BinaryStoreOptions {
                compression: Compression::None,
                block_size: 1024,
                resident_size: 4096,
            },
        )
        .unwrap()
    }

    #[test]
    fn long_frames_are_split_into_parts() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store(dir.path());
        let tracker = ResourceIndexTracker::new();
        let mut writer = ReplayWriter::new(dir.path(), "t", 2);

        let calls: Vec<_> = (0..5).map(|_| flush(Handle(0), 0)).collect();
        let path = writer.write_frame(1, &calls, &tracker, &mut store).unwrap();
        assert!(path.ends_with("t_frame001.cpp"));

        let text = fs::read_to_string(path).unwrap();
        assert!(text.starts_with("#include \"t.h\"\n"));
        assert!(text.contains("void ReplayFrame1Part3(void)\n{\n    clFlush(NULL);\n}"));
        assert!(text.contains("void ReplayFrame1(void)\n{\n    ReplayFrame1Part1();\n    ReplayFrame1Part2();\n    ReplayFrame1Part3();\n}"));
        assert!(!text.contains("Part4"));
    }

    #[test]
    fn inactive_setup_calls_get_their_own_function() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store(dir.path());
        let tracker = ResourceIndexTracker::new();
        let mut writer = ReplayWriter::new(dir.path(), "t", 100);

        let mut dead = finish(Handle(0), 0);
        dead.is_active = false;
        writer
            .set_setup_calls(&[flush(Handle(0), 0), dead], true, &tracker, &mut store)
            .unwrap();
        let [header, source] = writer.write_index(&tracker, &[], "t.cltrace.bin").unwrap();

        let source = fs::read_to_string(source).unwrap();
        assert!(source.contains("void SetupFirstFrame(void)\n{\n    clFlush(NULL);\n}"));
        assert!(source.contains("void SetupFirstFrameInactive(void)\n{\n    clFinish(NULL);\n}"));
        assert!(fs::read_to_string(header).unwrap().contains("void SetupFirstFrameInactive(void);"));
    }

    #[test]
    fn index_files_carry_capacities_resets_and_dispatch() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store(dir.path());
        let mut tracker = ResourceIndexTracker::new();
        let mut writer = ReplayWriter::new(dir.path(), "t", 100);

        let mut ctx = create_context(None, &[], 0, 0, Handle(0xc));
        tracker.register_call(&mut ctx);
        let mut releasing = release(ResourceKind::Context, Handle(0xc), 0).unwrap();
        tracker.register_call(&mut releasing);
        writer.set_setup_calls(&[ctx], false, &tracker, &mut store).unwrap();
        writer.write_frame(1, &[releasing.clone()], &tracker, &mut store).unwrap();
        writer.write_frame(2, &[releasing], &tracker, &mut store).unwrap();
        writer.note_read_size(64);
        writer.note_read_size(16);
        writer.note_extension_function("clIcdGetPlatformIDsKHR");

        let [header, source] = writer
            .write_index(
                &tracker,
                &[(ResourceKind::Context, Handle(0xc)), (ResourceKind::Mem, Handle(0xdead))],
                "t.cltrace.bin",
            )
            .unwrap();
        let header = fs::read_to_string(header).unwrap();
        let source = fs::read_to_string(source).unwrap();

        assert!(header.contains("extern clIcdGetPlatformIDsKHR_fn clIcdGetPlatformIDsKHR;"));
        assert!(header.contains("void ReplayFrame2(void);"));
        assert!(!header.contains("SetupFirstFrameInactive"));
        assert!(source.contains("clIcdGetPlatformIDsKHR_fn clIcdGetPlatformIDsKHR;"));
        assert!(source.contains("InitializeReplayCL2(\"t.cltrace.bin\", 0, 64, 0, 0, 8, 0, 0, 0, 0, 0, 0, 0);"));
        assert!(source.contains("clContextsMap[0] = clCreateContext(NULL, 0u, NULL, NULL, NULL, NULL);"));
        assert!(source.contains("void ResetReplay(void)\n{\n    clReleaseContext(clContextsMap[0]);\n}"));
        assert!(source.contains("        case 2:\n            ReplayFrame2();\n            break;"));
    }
}
