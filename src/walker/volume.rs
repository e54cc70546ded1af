// Volume system level of the walk

use tracing::{debug, info, instrument, trace, warn};

use super::{FilterVerdict, ImageWalker, PartitionFailure, WalkHooks, WalkOutcome};

impl<'a> ImageWalker<'a> {
    /// Walk the volume system at `start_offset`, or the file system there when
    /// no volume system is found.
    ///
    /// Partitions where no file system is detected, whose decoder reports
    /// corruption, or whose hooks fail are recorded in
    /// [`ImageWalker::partition_errors`] and skipped. Image I/O and storage
    /// failures end the walk.
    #[instrument(skip(self, hooks))]
    pub fn walk_volumes<H: WalkHooks + ?Sized>(&mut self, hooks: &mut H, start_offset: u64) -> WalkOutcome {
        self.partition_errors.clear();

        let image = self.image;
        let vs = match self.volumes.open(image, start_offset) {
            Ok(Some(vs)) => vs,
            Ok(None) => {
                debug!(start_offset, "No volume system, trying file system");
                return self.walk_file_system(hooks, start_offset);
            }
            Err(e) => return WalkOutcome::Error(e),
        };

        let vs_info = vs.info().clone();
        let mut partitions = match vs.partitions() {
            Ok(parts) => parts,
            Err(e) => return WalkOutcome::Error(e),
        };
        partitions.sort_by_key(|p| p.start);
        debug!(
            vs_type = %vs_info.vs_type,
            block_size = vs_info.block_size,
            partitions = partitions.len(),
            "Opened volume system"
        );

        let volume_filter = self.config.volumes;
        for partition in partitions.iter().filter(|p| volume_filter.includes(p)) {
            match hooks.filter_volume(partition) {
                FilterVerdict::Continue => {}
                FilterVerdict::Skip => {
                    trace!(index = partition.index, "Partition skipped by filter");
                    continue;
                }
                FilterVerdict::Stop => {
                    debug!(index = partition.index, "Volume walk stopped by filter");
                    return WalkOutcome::Stop;
                }
            }

            let offset = vs_info.partition_offset(partition);
            match self.walk_file_system(hooks, offset) {
                WalkOutcome::Ok => {}
                WalkOutcome::Stop => return WalkOutcome::Stop,
                WalkOutcome::Error(e) if e.is_recoverable_in_partition() => {
                    warn!(
                        index = partition.index,
                        offset,
                        description = %partition.description,
                        "Partition not walked: {}", e
                    );
                    self.partition_errors.push(PartitionFailure {
                        partition: partition.clone(),
                        offset,
                        error: e,
                    });
                }
                WalkOutcome::Error(e) => return WalkOutcome::Error(e),
            }
        }

        info!(
            partitions = partitions.len(),
            absorbed = self.partition_errors.len(),
            "Volume walk complete"
        );
        WalkOutcome::Ok
    }
}
