//! Memory map snapshots for process address space analysis
//!
//! Parses `/proc/<pid>/maps` text into a sorted, non-overlapping set of
//! regions. The unwinder consults a snapshot to decide whether an address is
//! executable code and whether it belongs to the uprobes trampoline page.

use log::warn;
use std::fmt;

use crate::domain::MapsParseError;

/// Path the kernel reports for the page holding uretprobe trampolines
pub const UPROBES_REGION_PATH: &str = "[uprobes]";

/// Access permissions of a mapped region (`rwxp` column)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Permissions {
    pub read: bool,
    pub write: bool,
    pub execute: bool,
    pub shared: bool,
}

impl Permissions {
    /// Parse the 4-character permission column, e.g. `r-xp`
    fn parse(perms: &str) -> Option<Self> {
        let bytes = perms.as_bytes();
        if bytes.len() != 4 {
            return None;
        }
        let flag = |byte: u8, set: u8| match byte {
            b'-' => Some(false),
            b if b == set => Some(true),
            _ => None,
        };
        Some(Self {
            read: flag(bytes[0], b'r')?,
            write: flag(bytes[1], b'w')?,
            execute: flag(bytes[2], b'x')?,
            shared: match bytes[3] {
                b's' => true,
                b'p' => false,
                _ => return None,
            },
        })
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}{}",
            if self.read { 'r' } else { '-' },
            if self.write { 'w' } else { '-' },
            if self.execute { 'x' } else { '-' },
            if self.shared { 's' } else { 'p' }
        )
    }
}

/// A single mapped region of the traced process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryRegion {
    pub start: u64,
    pub end: u64,
    pub offset: u64,
    pub permissions: Permissions,
    /// Backing file, or a pseudo-path such as `[stack]`; empty for anonymous maps
    pub path: String,
}

impl MemoryRegion {
    /// Check if an address falls within this region
    #[must_use]
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr < self.end
    }

    #[must_use]
    pub fn is_executable(&self) -> bool {
        self.permissions.execute
    }

    /// Whether this is the kernel's uretprobe trampoline page
    #[must_use]
    pub fn is_trampoline(&self) -> bool {
        self.path == UPROBES_REGION_PATH
    }

    /// Parse one line: "start-end perms offset dev inode [pathname]"
    fn parse_line(line_no: usize, line: &str) -> Result<Self, MapsParseError> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 5 {
            return Err(MapsParseError::MissingFields {
                line: line_no,
                found: fields.len(),
            });
        }

        let invalid_range = || MapsParseError::InvalidRange {
            line: line_no,
            range: fields[0].to_string(),
        };
        let (start, end) = fields[0].split_once('-').ok_or_else(invalid_range)?;
        let start = u64::from_str_radix(start, 16).map_err(|_| invalid_range())?;
        let end = u64::from_str_radix(end, 16).map_err(|_| invalid_range())?;
        if start >= end {
            return Err(invalid_range());
        }

        let permissions = Permissions::parse(fields[1]).ok_or_else(|| {
            MapsParseError::InvalidPermissions {
                line: line_no,
                perms: fields[1].to_string(),
            }
        })?;

        let offset = u64::from_str_radix(fields[2], 16).map_err(|_| MapsParseError::InvalidOffset {
            line: line_no,
            offset: fields[2].to_string(),
        })?;

        // Paths may contain spaces, e.g. "/tmp/lib.so (deleted)"
        let path = fields[5..].join(" ");

        Ok(Self {
            start,
            end,
            offset,
            permissions,
            path,
        })
    }
}

impl fmt::Display for MemoryRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:x}-{:x} {} {:08x} {}",
            self.start, self.end, self.permissions, self.offset, self.path
        )
    }
}

/// Immutable view of a process's mapped regions at one point in time
///
/// Regions are sorted by start address and never overlap.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryMapSnapshot {
    regions: Vec<MemoryRegion>,
}

impl MemoryMapSnapshot {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a snapshot from arbitrary regions, sorting them and dropping any
    /// region that overlaps one with a lower start address.
    #[must_use]
    pub fn from_regions(mut regions: Vec<MemoryRegion>) -> Self {
        regions.sort_by_key(|r| r.start);

        let mut kept: Vec<MemoryRegion> = Vec::with_capacity(regions.len());
        for region in regions {
            if let Some(last) = kept.last() {
                if region.start < last.end {
                    warn!("Dropping region {region} overlapping {last}");
                    continue;
                }
            }
            kept.push(region);
        }

        Self { regions: kept }
    }

    /// Parse `/proc/<pid>/maps` text, failing on the first malformed line
    ///
    /// # Errors
    /// Returns the first line that cannot be parsed, or a region that is not
    /// strictly after the one preceding it.
    pub fn parse(text: &str) -> Result<Self, MapsParseError> {
        let mut regions: Vec<MemoryRegion> = Vec::new();

        for (idx, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let region = MemoryRegion::parse_line(idx + 1, line)?;
            if let Some(last) = regions.last() {
                if region.start < last.end {
                    return Err(MapsParseError::Overlapping {
                        line: idx + 1,
                        start: region.start,
                        end: region.end,
                    });
                }
            }
            regions.push(region);
        }

        Ok(Self { regions })
    }

    /// Parse `/proc/<pid>/maps` text, keeping every line that parses
    ///
    /// Malformed lines are logged and skipped. The result may be empty; unwinds
    /// against it then fail as unwind errors instead of aborting the session.
    #[must_use]
    pub fn parse_lossy(text: &str) -> Self {
        let regions = text
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .filter_map(|(idx, line)| match MemoryRegion::parse_line(idx + 1, line) {
                Ok(region) => Some(region),
                Err(e) => {
                    warn!("Skipping malformed maps entry: {e}");
                    None
                }
            })
            .collect();

        Self::from_regions(regions)
    }

    /// Find the region containing `addr`
    #[must_use]
    pub fn find(&self, addr: u64) -> Option<&MemoryRegion> {
        let idx = self.regions.partition_point(|r| r.start <= addr);
        let region = self.regions.get(idx.checked_sub(1)?)?;
        region.contains(addr).then_some(region)
    }

    #[must_use]
    pub fn is_executable(&self, addr: u64) -> bool {
        self.find(addr).is_some_and(MemoryRegion::is_executable)
    }

    #[must_use]
    pub fn is_trampoline(&self, addr: u64) -> bool {
        self.find(addr).is_some_and(MemoryRegion::is_trampoline)
    }

    #[must_use]
    pub fn regions(&self) -> &[MemoryRegion] {
        &self.regions
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAPS: &str = "\
55d4a0a00000-55d4a0a02000 r--p 00000000 fd:01 1050 /usr/bin/app
55d4a0a02000-55d4a0a08000 r-xp 00002000 fd:01 1050 /usr/bin/app
7f1c2e000000-7f1c2e1c0000 r-xp 00028000 fd:01 2211 /usr/lib/libc.so.6
7ffd5a9f0000-7ffd5aa11000 rw-p 00000000 00:00 0    [stack]
7fffffffe000-7ffffffff000 r-xp 00000000 00:00 0    [uprobes]
";

    #[test]
    fn test_parse_proc_maps() {
        let maps = MemoryMapSnapshot::parse(MAPS).unwrap();
        assert_eq!(maps.len(), 5);

        let text = &maps.regions()[1];
        assert_eq!(text.start, 0x55d4_a0a0_2000);
        assert_eq!(text.end, 0x55d4_a0a0_8000);
        assert_eq!(text.offset, 0x2000);
        assert!(text.permissions.execute);
        assert!(!text.permissions.write);
        assert_eq!(text.path, "/usr/bin/app");
    }

    #[test]
    fn test_find_and_classify() {
        let maps = MemoryMapSnapshot::parse(MAPS).unwrap();

        assert!(maps.is_executable(0x55d4_a0a0_3000));
        // Read-only segment of the same binary is not code
        assert!(!maps.is_executable(0x55d4_a0a0_1000));
        // Gap between regions
        assert!(maps.find(0x6000_0000_0000).is_none());
        // End is exclusive
        assert!(maps.find(0x55d4_a0a0_8000).is_none());

        assert!(maps.is_trampoline(0x7fff_ffff_e000));
        assert!(!maps.is_trampoline(0x55d4_a0a0_3000));
    }

    #[test]
    fn test_path_with_spaces_and_anonymous() {
        let text = "\
1000-2000 r-xp 00000000 00:00 0 /tmp/lib.so (deleted)
3000-4000 rw-p 00000000 00:00 0
";
        let maps = MemoryMapSnapshot::parse(text).unwrap();
        assert_eq!(maps.regions()[0].path, "/tmp/lib.so (deleted)");
        assert_eq!(maps.regions()[1].path, "");
    }

    #[test]
    fn test_strict_parse_rejects_malformed() {
        let text = "1000-2000 r-xp 0 00:00 0 /a\nnot a maps line\n";
        let err = MemoryMapSnapshot::parse(text).unwrap_err();
        assert_eq!(err, MapsParseError::MissingFields { line: 2, found: 4 });

        let err = MemoryMapSnapshot::parse("2000-1000 r-xp 0 00:00 0 /a\n").unwrap_err();
        assert!(matches!(err, MapsParseError::InvalidRange { line: 1, .. }));

        let err = MemoryMapSnapshot::parse("1000-2000 rzxp 0 00:00 0 /a\n").unwrap_err();
        assert!(matches!(
            err,
            MapsParseError::InvalidPermissions { line: 1, .. }
        ));
    }

    #[test]
    fn test_strict_parse_rejects_overlap() {
        let text = "1000-3000 r-xp 0 00:00 0 /a\n2000-4000 r-xp 0 00:00 0 /b\n";
        let err = MemoryMapSnapshot::parse(text).unwrap_err();
        assert!(matches!(err, MapsParseError::Overlapping { line: 2, .. }));
    }

    #[test]
    fn test_lossy_parse_keeps_valid_lines() {
        let text = "\
garbage
1000-2000 r-xp 0 00:00 0 /a
1800-2800 r-xp 0 00:00 0 /overlap
3000-4000 r-xp 0 00:00 0 /b
";
        let maps = MemoryMapSnapshot::parse_lossy(text);
        let paths: Vec<&str> = maps.regions().iter().map(|r| r.path.as_str()).collect();
        assert_eq!(paths, vec!["/a", "/b"]);
    }

    #[test]
    fn test_lossy_parse_of_nonsense_is_empty() {
        let maps = MemoryMapSnapshot::parse_lossy("this is not\na maps file");
        assert!(maps.is_empty());
        assert!(!maps.is_executable(0x1000));
    }

    #[test]
    fn test_from_regions_sorts() {
        let region = |start, end| MemoryRegion {
            start,
            end,
            offset: 0,
            permissions: Permissions::parse("r-xp").unwrap(),
            path: String::new(),
        };
        let regions = vec![region(0x5000, 0x6000), region(0x1000, 0x2000)];
        let maps = MemoryMapSnapshot::from_regions(regions);
        assert_eq!(maps.regions()[0].start, 0x1000);
        assert_eq!(maps.find(0x5800).map(|r| r.start), Some(0x5000));
    }

    #[test]
    fn test_permissions_display_roundtrip() {
        for perms in ["r-xp", "rw-s", "---p"] {
            assert_eq!(Permissions::parse(perms).unwrap().to_string(), perms);
        }
        assert!(Permissions::parse("r-x").is_none());
    }
}
