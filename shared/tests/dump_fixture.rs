use gueststack_shared::{parse_stacks, parse_stacks_str, Stack};
use std::fs::File;
use std::io::BufReader;

const FIXTURE: &str = include_str!("fixtures/stack02.txt");

#[test]
fn test_real_dump_one_stack_per_header() {
    let stacks = parse_stacks_str(FIXTURE, Vec::new()).unwrap();

    let headers = FIXTURE.lines().filter(|l| l.starts_with("CPU:")).count();
    assert_eq!(stacks.len(), headers);
    assert_eq!(stacks.len(), 73);
    assert!(stacks.iter().all(|s| s.cpu == 2));
    assert_eq!(stacks[0].rip, 0x810c9340);
    assert_eq!(stacks.last().unwrap().rip, 0x81048ba4);

    let frames: usize = stacks.iter().map(|s| s.frames.len()).sum();
    assert_eq!(frames + headers, FIXTURE.lines().count());
}

#[test]
fn test_real_dump_stacks_with_frames() {
    let stacks = parse_stacks_str(FIXTURE, Vec::new()).unwrap();
    let with_frames: Vec<&Stack> = stacks.iter().filter(|s| s.has_frames()).collect();

    assert_eq!(with_frames.len(), 11);
    assert_eq!(with_frames[0].rip, 0x366b1);
    assert_eq!(with_frames[0].frames.len(), 36);
    assert_eq!(with_frames[0].frames[0], 0xffffe8ff0c344f38);
    assert_eq!(with_frames[0].frames[35], 0xffffe8ff00001a55);
}

#[test]
fn test_reader_and_str_agree() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/stack02.txt");
    let reader = BufReader::new(File::open(path).unwrap());

    let from_reader = parse_stacks(reader, Vec::new()).unwrap();
    let from_str = parse_stacks_str(FIXTURE, Vec::new()).unwrap();
    assert_eq!(from_reader, from_str);
}
