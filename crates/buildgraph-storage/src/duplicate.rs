use std::path::Path;

/// Files that several nodes are known to write with differing size or
/// timestamp. These are not treated as a cache violation.
const KNOWN_DUPLICATES: &[&str] = &[
    "agentinterface.pdb",
    "tbb.pdb",
    "tbbmalloc.pdb",
    "embree.2.14.0.pdb",
    "build.properties",
];

/// Whether `path` is a build product that may legitimately be rewritten by
/// more than one node: shared libraries and a few fixed third-party files.
pub fn is_duplicate_build_product(path: &Path) -> bool {
    let Some(name) = path.file_name() else {
        return false;
    };
    let name = name.to_string_lossy().to_ascii_lowercase();

    if KNOWN_DUPLICATES.contains(&name.as_str()) {
        return true;
    }
    if name.ends_with(".dll") || name.ends_with(".dylib") || name.ends_with(".so") {
        return true;
    }
    // Versioned shared objects: libfoo.so.2.14.0
    name.contains(".so.")
}
