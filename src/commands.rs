pub mod get;
pub mod info;
pub mod read;
pub mod repair;
pub mod sieve;

/// Comma-separated console output wrapped at roughly 80 columns, the way
/// long prime listings are traditionally printed.
pub struct ConsoleList {
    count: u64,
    chars: usize,
}

impl ConsoleList {
    pub fn new() -> Self {
        Self { count: 0, chars: 0 }
    }

    pub fn push(&mut self, text: &str) {
        if self.count > 0 {
            print!(",");
        }
        if self.chars + text.len() > 80 {
            println!();
            self.chars = 0;
        }
        self.chars += text.len() + 1;
        print!("{}", text);
        self.count += 1;
    }

    pub fn written(&self) -> u64 {
        self.count
    }

    pub fn finish(&self) {
        if self.count > 0 {
            println!();
        }
    }
}

impl Default for ConsoleList {
    fn default() -> Self {
        Self::new()
    }
}
