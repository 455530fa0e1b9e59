pub(crate) fn panicking() -> bool {
    std::thread::panicking()
}
