// File system level of the walk: detection, filtering and the directory walk

use std::collections::HashSet;
use tracing::{debug, instrument, trace};

use super::classify::{is_dir, is_dot_dir};
use super::{FileVisit, FilterVerdict, ImageWalker, WalkHooks, WalkOutcome};
use crate::error::EngineError;
use crate::fs::{FileSystem, FsEntry};
use crate::logging::is_trace_enabled;

/// A directory whose listing is being visited
struct DirFrame {
    addr: u64,
    path: String,
    entries: Vec<FsEntry>,
    next: usize,
}

impl<'a> ImageWalker<'a> {
    /// Walk the file system at `start_offset` from its root directory
    pub fn walk_file_system<H: WalkHooks + ?Sized>(&mut self, hooks: &mut H, start_offset: u64) -> WalkOutcome {
        self.open_and_walk(hooks, start_offset, None)
    }

    /// Walk the file system at `start_offset` from the directory at `root_addr`
    pub fn walk_file_system_from<H: WalkHooks + ?Sized>(
        &mut self,
        hooks: &mut H,
        start_offset: u64,
        root_addr: u64,
    ) -> WalkOutcome {
        self.open_and_walk(hooks, start_offset, Some(root_addr))
    }

    #[instrument(skip(self, hooks))]
    fn open_and_walk<H: WalkHooks + ?Sized>(
        &mut self,
        hooks: &mut H,
        start_offset: u64,
        root_addr: Option<u64>,
    ) -> WalkOutcome {
        let image = self.image;
        let fs = match self.file_systems.open(image, start_offset) {
            Ok(Some(fs)) => fs,
            Ok(None) => {
                return WalkOutcome::Error(EngineError::NoFileSystem { offset: start_offset });
            }
            Err(e) => return WalkOutcome::Error(e),
        };

        let info = fs.info().clone();
        debug!(
            fs_type = info.fs_type.name(),
            block_size = info.block_size,
            root_addr = info.root_addr,
            "Opened file system"
        );

        match hooks.filter_file_system(&info) {
            FilterVerdict::Continue => {}
            FilterVerdict::Skip => {
                debug!(start_offset, "File system skipped by filter");
                return WalkOutcome::Ok;
            }
            FilterVerdict::Stop => return WalkOutcome::Stop,
        }

        self.walk_directories(hooks, fs.as_ref(), root_addr.unwrap_or(info.root_addr))
    }

    /// Depth-first, pre-order directory walk with an explicit stack
    fn walk_directories<H: WalkHooks + ?Sized>(
        &self,
        hooks: &mut H,
        fs: &dyn FileSystem,
        root_addr: u64,
    ) -> WalkOutcome {
        let filter = self.config.files;

        let root_entries = match fs.read_dir(root_addr) {
            Ok(entries) => entries,
            Err(e) => return WalkOutcome::Error(e),
        };

        // Directories already entered; corrupt metadata can loop back on itself
        let mut entered = HashSet::from([root_addr]);
        let mut stack = vec![DirFrame {
            addr: root_addr,
            path: "/".to_string(),
            entries: root_entries,
            next: 0,
        }];
        let mut visited = 0usize;

        while let Some(frame) = stack.last_mut() {
            if frame.next >= frame.entries.len() {
                stack.pop();
                continue;
            }
            let entry = &frame.entries[frame.next];
            frame.next += 1;

            if !filter.includes(entry) {
                continue;
            }

            let visit = FileVisit {
                fs,
                entry,
                path: &frame.path,
                parent_addr: frame.addr,
            };
            if is_trace_enabled() {
                trace!(path = %frame.path, name = %entry.name, meta_addr = entry.meta_addr, "Visiting entry");
            }
            match hooks.process_file(&visit) {
                WalkOutcome::Ok => visited += 1,
                WalkOutcome::Stop => {
                    debug!(visited, "File system walk stopped by hook");
                    return WalkOutcome::Stop;
                }
                WalkOutcome::Error(e) => return WalkOutcome::Error(e),
            }

            if !filter.recurse || !is_dir(entry) || is_dot_dir(entry) {
                continue;
            }
            if !entered.insert(entry.meta_addr) {
                debug!(meta_addr = entry.meta_addr, name = %entry.name, "Directory loop, not descending");
                continue;
            }
            let child_addr = entry.meta_addr;
            let child_path = format!("{}{}/", frame.path, entry.name);

            let children = match fs.read_dir(child_addr) {
                Ok(entries) => entries,
                Err(e) => return WalkOutcome::Error(e),
            };
            stack.push(DirFrame {
                addr: child_addr,
                path: child_path,
                entries: children,
                next: 0,
            });
        }

        debug!(visited, "File system walk complete");
        WalkOutcome::Ok
    }
}

#[cfg(test)]
mod tests {
    use crate::error::EngineError;
    use crate::fs::FsInfo;
    use crate::image::MemoryImage;
    use crate::testing::{dir, file, MockVolumes, Recorder, TreeFs, TreeFsDecoder};
    use crate::walker::{FileFilter, FilterVerdict, ImageWalker, WalkConfig, WalkHooks, WalkOutcome, FileVisit};

    fn tree() -> TreeFs {
        TreeFs::new(vec![
            (
                2,
                vec![
                    dir(2, "."),
                    dir(2, ".."),
                    file(10, "a.txt", 5),
                    dir(11, "docs"),
                    file(13, "z.txt", 1),
                ],
            ),
            (11, vec![dir(11, "."), dir(2, ".."), file(12, "readme.txt", 11), dir(14, "sub")]),
            (14, vec![file(15, "deep.bin", 3)]),
        ])
    }

    fn walk(config: WalkConfig, fs_tree: TreeFs, hooks: &mut Recorder) -> WalkOutcome {
        let image = MemoryImage::new(vec![0; 512]);
        let volumes = MockVolumes::none();
        let fs = TreeFsDecoder::new().with_fs(0, fs_tree);
        ImageWalker::with_config(&image, &volumes, &fs, config).walk_file_system(hooks, 0)
    }

    #[test]
    fn test_pre_order_with_paths() {
        let mut hooks = Recorder::default();
        assert!(walk(WalkConfig::default(), tree(), &mut hooks).is_ok());
        assert_eq!(
            hooks.paths,
            vec![
                "/.",
                "/..",
                "/a.txt",
                "/docs",
                "/docs/.",
                "/docs/..",
                "/docs/readme.txt",
                "/docs/sub",
                "/docs/sub/deep.bin",
                "/z.txt",
            ]
        );
        assert_eq!(hooks.parents[6], 11);
        assert_eq!(hooks.parent_paths[8], "/docs/sub/");
    }

    #[test]
    fn test_stop_on_third_file() {
        let mut hooks = Recorder::stop_after(3);
        let outcome = walk(WalkConfig::default(), tree(), &mut hooks);
        assert!(outcome.is_stop());
        assert_eq!(hooks.paths, vec!["/.", "/..", "/a.txt"]);
    }

    #[test]
    fn test_walk_is_repeatable() {
        let image = MemoryImage::new(vec![0; 512]);
        let volumes = MockVolumes::none();
        let fs = TreeFsDecoder::new().with_fs(0, tree());
        let mut walker = ImageWalker::new(&image, &volumes, &fs);

        let mut first = Recorder::default();
        let mut second = Recorder::default();
        assert!(walker.walk_file_system(&mut first, 0).is_ok());
        assert!(walker.walk_file_system(&mut second, 0).is_ok());
        assert_eq!(first.paths, second.paths);
        assert_eq!(fs.opens(), 2);
        assert_eq!(fs.drops(), 2);
    }

    #[test]
    fn test_no_recursion_lists_root_only() {
        let config = WalkConfig {
            files: FileFilter {
                recurse: false,
                ..FileFilter::default()
            },
            ..WalkConfig::default()
        };
        let mut hooks = Recorder::default();
        assert!(walk(config, tree(), &mut hooks).is_ok());
        assert_eq!(hooks.paths, vec!["/.", "/..", "/a.txt", "/docs", "/z.txt"]);
    }

    #[test]
    fn test_unallocated_entries_excluded() {
        let mut fs_tree = tree();
        fs_tree.set_allocated(11, false);
        let config = WalkConfig {
            files: FileFilter {
                unallocated: false,
                ..FileFilter::default()
            },
            ..WalkConfig::default()
        };
        let mut hooks = Recorder::default();
        assert!(walk(config, fs_tree, &mut hooks).is_ok());
        // the deleted directory is neither reported nor entered
        assert_eq!(hooks.paths, vec!["/.", "/..", "/a.txt", "/z.txt"]);
    }

    #[test]
    fn test_directory_loop_is_not_reentered() {
        let looped = TreeFs::new(vec![
            (2, vec![dir(11, "a")]),
            (11, vec![dir(12, "b")]),
            (12, vec![dir(11, "back_to_a"), file(20, "f", 1)]),
        ]);
        let mut hooks = Recorder::default();
        assert!(walk(WalkConfig::default(), looped, &mut hooks).is_ok());
        assert_eq!(hooks.paths, vec!["/a", "/a/b", "/a/b/back_to_a", "/a/b/f"]);
    }

    #[test]
    fn test_thousand_level_tree() {
        let levels: Vec<_> = (0..1000u64)
            .map(|depth| (100 + depth, vec![dir(101 + depth, "d")]))
            .collect();
        let mut nodes = vec![(2u64, vec![dir(100, "d")])];
        nodes.extend(levels);
        nodes.push((1100, vec![file(5000, "leaf", 1)]));

        let mut hooks = Recorder::default();
        assert!(walk(WalkConfig::default(), TreeFs::new(nodes), &mut hooks).is_ok());
        assert_eq!(hooks.paths.len(), 1002);
        let leaf = hooks.paths.last().unwrap();
        assert!(leaf.ends_with("/d/leaf"));
        assert_eq!(leaf.matches("/d").count(), 1001);
    }

    #[test]
    fn test_no_file_system_is_an_error() {
        let image = MemoryImage::new(vec![0; 512]);
        let volumes = MockVolumes::none();
        let fs = TreeFsDecoder::new();
        let mut hooks = Recorder::default();
        let outcome = ImageWalker::new(&image, &volumes, &fs).walk_file_system(&mut hooks, 0);
        assert!(matches!(outcome, WalkOutcome::Error(EngineError::NoFileSystem { offset: 0 })));
    }

    #[test]
    fn test_file_system_filter() {
        struct FsVerdict(FilterVerdict, usize);

        impl WalkHooks for FsVerdict {
            fn filter_file_system(&mut self, _fs: &FsInfo) -> FilterVerdict {
                self.0
            }

            fn process_file(&mut self, _visit: &FileVisit<'_>) -> WalkOutcome {
                self.1 += 1;
                WalkOutcome::Ok
            }
        }

        let image = MemoryImage::new(vec![0; 512]);
        let volumes = MockVolumes::none();
        let fs = TreeFsDecoder::new().with_fs(0, tree());
        let mut walker = ImageWalker::new(&image, &volumes, &fs);

        let mut skip = FsVerdict(FilterVerdict::Skip, 0);
        assert!(walker.walk_file_system(&mut skip, 0).is_ok());
        assert_eq!(skip.1, 0);

        let mut stop = FsVerdict(FilterVerdict::Stop, 0);
        assert!(walker.walk_file_system(&mut stop, 0).is_stop());
        assert_eq!(stop.1, 0);
        assert_eq!(fs.drops(), 2);
    }

    #[test]
    fn test_walk_from_subdirectory() {
        let image = MemoryImage::new(vec![0; 512]);
        let volumes = MockVolumes::none();
        let fs = TreeFsDecoder::new().with_fs(0, tree());
        let mut hooks = Recorder::default();
        let outcome = ImageWalker::new(&image, &volumes, &fs).walk_file_system_from(&mut hooks, 0, 14);
        assert!(outcome.is_ok());
        assert_eq!(hooks.paths, vec!["/deep.bin"]);
    }

    #[test]
    fn test_listing_failure_releases_handle() {
        let image = MemoryImage::new(vec![0; 512]);
        let volumes = MockVolumes::none();
        let fs = TreeFsDecoder::new().with_fs(0, tree().failing_dir(14));
        let mut hooks = Recorder::default();
        let outcome = ImageWalker::new(&image, &volumes, &fs).walk_file_system(&mut hooks, 0);
        assert!(matches!(outcome, WalkOutcome::Error(EngineError::Decoder { .. })));
        assert_eq!(hooks.paths.last().map(String::as_str), Some("/docs/sub"));
        assert_eq!(fs.drops(), 1);
    }
}
