/// Progress update callbacks
pub trait ProgressCallbacks {
    /// Programming of `total` pages starting at `addr` is about to begin
    fn init(&mut self, addr: u32, total: usize);
    /// `current` pages have been handed to the flash controller
    fn update(&mut self, current: usize);
    /// All pages written and the boot source updated
    fn finish(&mut self);
}
