use serde::Serialize;

/// Stats from an enrichment run.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct EnrichStats {
    pub comments_scanned: u32,
    pub comments_skipped: u32,
    pub coordinates_extracted: u32,
    pub extraction_failed: u32,
    pub posts_processed: u32,
    pub posts_found: u32,
    pub posts_with_coordinates: u32,
    pub users_written: u32,
    pub write_conflicts: u32,
}

impl std::fmt::Display for EnrichStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Enrichment Run Complete ===")?;
        writeln!(f, "Comments scanned:   {}", self.comments_scanned)?;
        writeln!(f, "Comments skipped:   {}", self.comments_skipped)?;
        writeln!(f, "Coords extracted:   {}", self.coordinates_extracted)?;
        writeln!(f, "Extraction failed:  {}", self.extraction_failed)?;
        writeln!(f, "\nPosts processed:    {}", self.posts_processed)?;
        let processed = self.posts_processed.max(1);
        writeln!(
            f,
            "  Found:            {} ({:.0}%)",
            self.posts_found,
            self.posts_found as f64 / processed as f64 * 100.0
        )?;
        writeln!(f, "  With coordinates: {}", self.posts_with_coordinates)?;
        writeln!(f, "\nUsers written:      {}", self.users_written)?;
        if self.write_conflicts > 0 {
            writeln!(f, "Write conflicts:    {} (ignored)", self.write_conflicts)?;
        }
        Ok(())
    }
}
