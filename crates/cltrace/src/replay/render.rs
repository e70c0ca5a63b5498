//! Rendering of single call records as C++ statements.

use std::collections::HashMap;
use std::fmt::Write;

use crate::binary::BinaryDataStore;
use crate::call::CallCapture;
use crate::entry_point::EntryPoint;
use crate::error::Result;
use crate::handle::{Handle, ResourceKind};
use crate::index::{ResourceIndexTracker, INDEX_NOT_PRESENT};
use crate::param::{payload_u64s, ParamCapture, ParamType, ParamValue, PropertiesKind};

/// Scratch pointer the fixture provides for host memory replay code reads into.
pub const READ_BUFFER: &str = "gReadBuffer";

/// Static data that generated functions refer to by name, collected for the index header.
#[derive(Debug, Default)]
pub struct HeaderStatics {
    lines: Vec<String>,
    counter: usize,
    strings: HashMap<Vec<String>, String>,
}

impl HeaderStatics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    fn next_name(&mut self, call: &str, param: &str) -> String {
        self.counter += 1;
        format!("{call}_{param}_{}", self.counter)
    }

    /// `const size_t <call>_<param>_<n>[] = {..};`
    pub fn size_t_array(&mut self, call: &str, param: &str, values: &[usize]) -> String {
        let name = self.next_name(call, param);
        let values: Vec<String> = values.iter().map(usize::to_string).collect();
        self.lines
            .push(format!("const size_t {name}[] = {{{}}};", values.join(", ")));
        name
    }

    /// Writable `size_t` slots for out-parameters the replayed call fills in.
    pub fn size_t_slots(&mut self, call: &str, param: &str, values: &[usize]) -> String {
        let name = self.next_name(call, param);
        let values: Vec<String> = values.iter().map(usize::to_string).collect();
        self.lines
            .push(format!("static size_t {name}[] = {{{}}};", values.join(", ")));
        name
    }

    pub fn properties(&mut self, call: &str, param: &str, kind: PropertiesKind, values: &[u64]) -> String {
        let name = self.next_name(call, param);
        let values: Vec<String> = values.iter().map(|v| format!("{v:#x}")).collect();
        self.lines.push(format!(
            "const {} {name}[] = {{{}}};",
            kind.c_type(),
            values.join(", ")
        ));
        name
    }

    /// Raw-string array of program sources. Identical source lists share one array.
    pub fn string_array(&mut self, call: &str, param: &str, strings: &[String]) -> String {
        if let Some(name) = self.strings.get(strings) {
            return name.clone();
        }
        let name = self.next_name(call, param);
        let mut decl = format!("const char *const {name}[] = {{\n");
        for s in strings {
            decl.push_str(&raw_string(s));
            decl.push_str(",\n");
        }
        decl.push_str("};");
        self.lines.push(decl);
        self.strings.insert(strings.to_vec(), name.clone());
        name
    }
}

fn raw_string(s: &str) -> String {
    let mut delim = String::new();
    let mut n = 0;
    while s.contains(&format!("){delim}\"")) {
        n += 1;
        delim = format!("cl{n}");
    }
    format!("R\"{delim}({s}){delim}\"")
}

fn c_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn map_entry(kind: ResourceKind, index: usize) -> String {
    if index == INDEX_NOT_PRESENT {
        "NULL".to_owned()
    } else {
        format!("{}[{index}]", kind.map_name())
    }
}

/// Renders calls, moving their payloads into the binary store as it goes.
pub struct Renderer<'a> {
    pub tracker: &'a ResourceIndexTracker,
    pub store: &'a mut BinaryDataStore,
    pub statics: &'a mut HeaderStatics,
}

#[derive(Default)]
struct Rendered {
    pre: Vec<String>,
    args: Vec<String>,
    post: Vec<String>,
}

impl Renderer<'_> {
    /// Appends the statements for `call` to `out`, each indented by `indent`.
    pub fn render(&mut self, call: &CallCapture, indent: &str, out: &mut String) -> Result<()> {
        let mut r = Rendered::default();
        for param in &call.params {
            let arg = self.render_param(call, param, &mut r)?;
            r.args.push(arg);
        }

        let prefix = self.return_prefix(call);
        for line in &r.pre {
            writeln!(out, "{indent}{line}")?;
        }
        writeln!(out, "{indent}{prefix}{}({});", call.name(), r.args.join(", "))?;
        for line in &r.post {
            writeln!(out, "{indent}{line}")?;
        }
        Ok(())
    }

    fn return_prefix(&self, call: &CallCapture) -> String {
        if let Some(name) = &call.assign_to {
            return format!("{name} = ({name}_fn)");
        }
        let Some(ret) = &call.return_value else {
            return String::new();
        };
        match ret.ty {
            ParamType::Handle(kind) => self
                .tracker
                .param_index(ret)
                .map(|i| format!("{} = ", map_entry(kind, i)))
                .unwrap_or_default(),
            ParamType::VoidPointer => self
                .tracker
                .param_index(ret)
                .map(|i| format!("{} = ", map_entry(ResourceKind::Void, i)))
                .unwrap_or_default(),
            _ => String::new(),
        }
    }

    fn binary(&mut self, bytes: &[u8]) -> Result<String> {
        let offset = self.store.append(bytes)?;
        Ok(format!("GetBinaryData({offset})"))
    }

    fn indices(&self, param: &ParamCapture) -> Vec<usize> {
        self.tracker
            .vector(param.id)
            .map(<[usize]>::to_vec)
            .unwrap_or_default()
    }

    fn render_param(&mut self, call: &CallCapture, param: &ParamCapture, r: &mut Rendered) -> Result<String> {
        let ep = call.entry_point();
        let name = call.name();
        Ok(match (param.ty, &param.value) {
            (ParamType::UInt, ParamValue::U32(v)) => format!("{v}u"),
            (ParamType::Int, ParamValue::I32(v)) => v.to_string(),
            (ParamType::Bool, ParamValue::Bool(v)) => {
                if *v { "CL_TRUE" } else { "CL_FALSE" }.to_owned()
            }
            (ParamType::Bitfield | ParamType::Enum, ParamValue::U32(v)) => format!("{v:#x}"),
            (ParamType::Bitfield | ParamType::Enum, ParamValue::U64(v)) => format!("{v:#x}"),
            (ParamType::SizeT | ParamType::ULong, ParamValue::U64(v)) => v.to_string(),
            (ParamType::SizeT | ParamType::ULong, ParamValue::U32(v)) => v.to_string(),

            (ParamType::Handle(kind), ParamValue::Handle(h)) if !h.is_null() => {
                map_entry(kind, self.tracker.param_index(param).unwrap_or(INDEX_NOT_PRESENT))
            }
            (ParamType::HandleOut(kind), ParamValue::Handle(h)) if !h.is_null() => {
                match self.tracker.param_index(param) {
                    Some(i) => format!("&{}", map_entry(kind, i)),
                    None => "NULL".to_owned(),
                }
            }
            (ParamType::HandleArray(kind), ParamValue::Handles(hs)) if !hs.is_empty() => {
                let indices = self.indices(param);
                let entries: Vec<String> = (0..hs.len())
                    .map(|k| map_entry(kind, indices.get(k).copied().unwrap_or(INDEX_NOT_PRESENT)))
                    .collect();
                let list = kind.temporary_list();
                r.pre.push(format!("{list} = {{{}}};", entries.join(", ")));
                format!("{list}.data()")
            }
            (ParamType::HandleArrayOut(kind), ParamValue::Handles(hs)) => {
                let list = kind.temporary_list();
                r.pre.push(format!("{list}.clear();"));
                r.pre.push(format!("{list}.resize({});", hs.len()));
                for (k, index) in self.indices(param).into_iter().enumerate() {
                    r.post.push(format!("{} = {list}[{k}];", map_entry(kind, index)));
                }
                format!("{list}.data()")
            }
            (ParamType::ArgHandle(kind), ParamValue::Handle(_)) => {
                match self.tracker.param_index(param) {
                    Some(i) => format!("(const void *)&{}", map_entry(kind, i)),
                    None => "NULL".to_owned(),
                }
            }

            (ParamType::SizeTArray, _) if param.payload.is_some() => {
                let values = param.size_t_values();
                self.statics.size_t_array(name, param.name, &values)
            }
            (ParamType::ScalarOut, _) if param.payload.is_some() => {
                let values = param.size_t_values();
                self.statics.size_t_slots(name, param.name, &values)
            }
            (ParamType::Properties(PropertiesKind::Context), v) if !v.is_null() => {
                "temporaryContextProps.data()".to_owned()
            }
            (ParamType::Properties(kind), _) if param.payload.is_some() => {
                let values = payload_u64s(param.payload.as_deref().unwrap_or_default());
                self.statics.properties(name, param.name, kind, &values)
            }

            (ParamType::ConstVoidPointer, _) => match param.payload.as_deref() {
                Some(bytes) if ep == Some(EntryPoint::EnqueueNativeKernel) && param.name == "args" => {
                    let data = self.binary(bytes)?;
                    r.pre.push(format!("temporaryVoidPtr = malloc({});", bytes.len()));
                    r.pre.push(format!(
                        "std::memcpy(temporaryVoidPtr, {data}, {});",
                        bytes.len()
                    ));
                    "temporaryVoidPtr".to_owned()
                }
                Some(bytes) => format!("(const uint8_t *){}", self.binary(bytes)?),
                None => "NULL".to_owned(),
            },
            (ParamType::OffsetArray, ParamValue::Offsets(offsets)) if !offsets.is_empty() => {
                let entries: Vec<String> = offsets
                    .iter()
                    .map(|off| format!("&((char *)temporaryVoidPtr)[{off}]"))
                    .collect();
                let list = ResourceKind::Void.temporary_list();
                r.pre.push(format!("{list} = {{{}}};", entries.join(", ")));
                format!("(const void **){list}.data()")
            }
            (ParamType::VoidPointer, ParamValue::Pointer(p)) => {
                if let Some(i) = self.tracker.param_index(param) {
                    map_entry(ResourceKind::Void, i)
                } else if is_read_destination(ep, param.name) {
                    READ_BUFFER.to_owned()
                } else {
                    format!("(void *){p:#x}")
                }
            }
            (ParamType::VoidPointerArray, ParamValue::Pointers(ps)) if !ps.is_empty() => {
                let indices = self.indices(param);
                let entries: Vec<String> = ps
                    .iter()
                    .enumerate()
                    .map(|(k, p)| match indices.get(k) {
                        Some(&i) if i != INDEX_NOT_PRESENT => map_entry(ResourceKind::Void, i),
                        _ => format!("(void *){p:#x}"),
                    })
                    .collect();
                let list = ResourceKind::Void.temporary_list();
                r.pre.push(format!("{list} = {{{}}};", entries.join(", ")));
                format!("{list}.data()")
            }

            (ParamType::String, ParamValue::Str(s)) => c_string(s),
            (ParamType::StringArray, ParamValue::Strings(strings)) => {
                let array = self.statics.string_array(name, param.name, strings);
                format!("const_cast<const char **>({array})")
            }
            (ParamType::BinaryArray, ParamValue::Blobs(blobs)) => {
                let mut entries = Vec::with_capacity(blobs.len());
                for blob in blobs {
                    entries.push(format!("(const unsigned char *){}", self.binary(blob)?));
                }
                r.pre.push(format!(
                    "temporaryUnsignedCharPointerList = {{{}}};",
                    entries.join(", ")
                ));
                "temporaryUnsignedCharPointerList.data()".to_owned()
            }

            (ParamType::ImageFormat, _) => match param.payload.as_deref() {
                Some(bytes) => format!("(const cl_image_format *){}", self.binary(bytes)?),
                None => "NULL".to_owned(),
            },
            (ParamType::ImageDesc, value) => match param.payload.as_deref() {
                Some(bytes) => {
                    let data = self.binary(bytes)?;
                    match (value, self.tracker.param_index(param)) {
                        (ParamValue::Handle(h), Some(i)) if !h.is_null() => {
                            r.pre.push(format!(
                                "std::memcpy(&temporaryImageDesc, {data}, sizeof(cl_image_desc));"
                            ));
                            r.pre.push(format!(
                                "temporaryImageDesc.mem_object = {};",
                                map_entry(ResourceKind::Mem, i)
                            ));
                            "&temporaryImageDesc".to_owned()
                        }
                        _ => format!("(const cl_image_desc *){data}"),
                    }
                }
                None => "NULL".to_owned(),
            },
            (ParamType::BufferRegion, _) => match param.payload.as_deref() {
                Some(bytes) => format!("(const cl_buffer_region *){}", self.binary(bytes)?),
                None => "NULL".to_owned(),
            },

            // Callbacks, user data, errcode and info outputs are never replayed.
            _ => "NULL".to_owned(),
        })
    }
}

/// Host pointers the replay reads device data into.
pub fn is_read_destination(ep: Option<EntryPoint>, param: &str) -> bool {
    param == "ptr"
        && matches!(
            ep,
            Some(EntryPoint::EnqueueReadBuffer | EntryPoint::EnqueueReadBufferRect | EntryPoint::EnqueueReadImage)
        )
}

/// Formats the `clRelease*` call for a leftover object, if it has a map slot.
pub fn render_reset(tracker: &ResourceIndexTracker, kind: ResourceKind, handle: Handle) -> Option<String> {
    let release = kind.release_fn()?;
    let index = tracker.lookup(kind, handle)?;
    Some(format!("{release}({});", map_entry(kind, index)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binary::{BinaryStoreOptions, Compression};
    use crate::capture::*;
    use crate::cl::MemFlags;

    struct Fixture {
        _dir: tempfile::TempDir,
        store: BinaryDataStore,
        statics: HeaderStatics,
        tracker: ResourceIndexTracker,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = BinaryDataStore::create(
            dir.path().join("t.bin"),
            BinaryStoreOptions {
                compression: Compression::None,
                block_size: 1024,
                resident_size: 4096,
            },
        )
        .unwrap();
        Fixture {
            _dir: dir,
            store,
            statics: HeaderStatics::new(),
            tracker: ResourceIndexTracker::new(),
        }
    }

    fn render(f: &mut Fixture, mut call: CallCapture) -> String {
        f.tracker.register_call(&mut call);
        let mut out = String::new();
        Renderer {
            tracker: &f.tracker,
            store: &mut f.store,
            statics: &mut f.statics,
        }
        .render(&call, "    ", &mut out)
        .unwrap();
        out
    }

    #[test]
    fn create_assigns_into_the_map() {
        let mut f = fixture();
        render(&mut f, create_context(None, &[], 0, 0, Handle(0xc)));
        let out = render(
            &mut f,
            create_buffer(Handle(0xc), MemFlags::READ_WRITE | MemFlags::COPY_HOST_PTR, 4, Some(&[1u8, 2, 3, 4][..]), Handle(0xb)),
        );
        assert_eq!(
            out,
            "    clMemMap[0] = clCreateBuffer(clContextsMap[0], 0x21, 4, (const uint8_t *)GetBinaryData(0), NULL);\n"
        );
    }

    #[test]
    fn wait_lists_become_temporary_lists() {
        let mut f = fixture();
        f.tracker.assign_or_lookup(ResourceKind::CommandQueue, Handle(0x9));
        f.tracker.assign_or_lookup(ResourceKind::Event, Handle(0xe0));
        f.tracker.assign_or_lookup(ResourceKind::Event, Handle(0xe1));
        let out = render(&mut f, enqueue_barrier_with_wait_list(Handle(0x9), &[Handle(0xe0), Handle(0xe1)], Some(Handle(0xe2)), 0));
        assert_eq!(
            out,
            "    temporaryEventsList = {clEventsMap[0], clEventsMap[1]};\n    \
             clEnqueueBarrierWithWaitList(clCommandQueuesMap[0], 2u, temporaryEventsList.data(), &clEventsMap[2]);\n"
        );
    }

    #[test]
    fn out_arrays_copy_back_into_the_map() {
        let mut f = fixture();
        let out = render(&mut f, get_platform_ids(2, Some(&[Handle(1), Handle(2)][..]), 0));
        assert!(out.contains("temporaryPlatformsList.resize(2);"));
        assert!(out.contains("clGetPlatformIDs(2u, temporaryPlatformsList.data(), NULL);"));
        assert!(out.ends_with("clPlatformsMap[1] = temporaryPlatformsList[1];\n"));
    }

    #[test]
    fn sources_are_shared_header_statics() {
        let mut f = fixture();
        let a = render(&mut f, create_program_with_source(Handle(1), &["kernel void k() {}"], Handle(2)));
        let b = render(&mut f, create_program_with_source(Handle(1), &["kernel void k() {}"], Handle(3)));
        assert!(a.contains("const_cast<const char **>(clCreateProgramWithSource_strings_1)"));
        assert!(b.contains("clCreateProgramWithSource_strings_1"));
        assert_eq!(f.statics.lines().len(), 1);
        assert!(f.statics.lines()[0].contains("R\"(kernel void k() {})\""));
    }

    #[test]
    fn raw_strings_pick_a_safe_delimiter() {
        assert_eq!(raw_string("a)\"b"), "R\"cl1(a)\"b)cl1\"");
    }

    #[test]
    fn reads_target_the_fixture_buffer() {
        let mut f = fixture();
        let out = render(&mut f, enqueue_read_buffer(Handle(9), Handle(8), true, 0, 16, 0x7fff0000, &[], None, 0));
        assert!(out.contains(", gReadBuffer, 0u, NULL, NULL);"));
    }
}
