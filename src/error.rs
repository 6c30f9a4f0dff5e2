use std::io;

quick_error! {
    /// host side failures. guest faults are delivered as `interrupt::Exception` instead
    #[derive(Debug)]
    pub enum Error {
        Io(err: io::Error) {
            from()
            display("I/O error: {}", err)
            cause(err)
        }
        Toml(err: toml::de::Error) {
            from()
            display("config parse error: {}", err)
            cause(err)
        }
        InvalidConfig(msg: String) {
            display("invalid config: {}", msg)
        }
        ImageTooLarge(len: usize, addr: u32) {
            display("image of {} bytes does not fit in memory at {:06X}", len, addr)
        }
    }
}
