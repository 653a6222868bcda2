fn main() {
    docbench::cmdline();
}
