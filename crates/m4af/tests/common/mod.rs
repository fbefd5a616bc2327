#![allow(dead_code)]

use m4af::{config::Codec, Muxer};
use std::io::Cursor;

/// A box found in a buffer. `body` excludes the header.
#[derive(Debug, Clone, Copy)]
pub struct Atom<'a> {
    pub kind: [u8; 4],
    pub offset: usize,
    pub size: usize,
    pub body: &'a [u8],
}

fn be32(buf: &[u8], at: usize) -> u32 {
    u32::from_be_bytes(buf[at..at + 4].try_into().unwrap())
}

fn be64(buf: &[u8], at: usize) -> u64 {
    u64::from_be_bytes(buf[at..at + 8].try_into().unwrap())
}

/// Siblings laid out back to back in `buf`. `base` is the file offset of
/// `buf[0]`.
pub fn atoms(buf: &[u8], base: usize) -> Vec<Atom<'_>> {
    let mut out = Vec::new();
    let mut pos = 0;
    while pos + 8 <= buf.len() {
        let mut size = be32(buf, pos) as usize;
        let kind: [u8; 4] = buf[pos + 4..pos + 8].try_into().unwrap();
        let mut header = 8;
        if size == 1 {
            size = be64(buf, pos + 8) as usize;
            header = 16;
        } else if size == 0 {
            size = buf.len() - pos;
        }
        assert!(size >= header, "bad size for {:?}", kind);
        out.push(Atom {
            kind,
            offset: base + pos,
            size,
            body: &buf[pos + header..pos + size],
        });
        pos += size;
    }
    assert_eq!(pos, buf.len(), "trailing bytes");
    out
}

/// Bytes before the first child of a box of this type.
fn children_start(kind: &[u8; 4]) -> usize {
    match kind {
        b"meta" => 4,
        b"stsd" => 8,
        b"mp4a" | b"alac" => 28,
        _ => 0,
    }
}

/// Follows `path` from the top level and returns the last box on it.
pub fn find<'a>(file: &'a [u8], path: &[&[u8; 4]]) -> Option<Atom<'a>> {
    let mut siblings = atoms(file, 0);
    let mut found = None;
    let mut parent = [0; 4];
    for kind in path {
        let atom = *siblings.iter().find(|a| &a.kind == *kind)?;
        let skip = children_start(&atom.kind);
        let start = atom.offset + atom.size - atom.body.len() + skip;
        // items nest their `data` boxes
        let container = is_container(&atom.kind) || &parent == b"ilst";
        siblings = if atom.body.len() > skip && container {
            atoms(&atom.body[skip..], start)
        } else {
            Vec::new()
        };
        parent = atom.kind;
        found = Some(atom);
    }
    found
}

fn is_container(kind: &[u8; 4]) -> bool {
    matches!(
        kind,
        b"moov"
            | b"trak"
            | b"edts"
            | b"mdia"
            | b"minf"
            | b"dinf"
            | b"stbl"
            | b"stsd"
            | b"mp4a"
            | b"alac"
            | b"udta"
            | b"meta"
            | b"ilst"
    )
}

pub const STBL: [&[u8; 4]; 5] = [b"moov", b"trak", b"mdia", b"minf", b"stbl"];

pub fn stbl_box<'a>(file: &'a [u8], kind: &[u8; 4]) -> Option<Atom<'a>> {
    let mut path = STBL.to_vec();
    path.push(kind);
    find(file, &path)
}

pub fn top_level_kinds(file: &[u8]) -> Vec<[u8; 4]> {
    atoms(file, 0).iter().map(|a| a.kind).collect()
}

pub fn chunk_offsets(file: &[u8]) -> Vec<u64> {
    if let Some(stco) = stbl_box(file, b"stco") {
        let n = be32(stco.body, 4) as usize;
        (0..n).map(|i| be32(stco.body, 8 + 4 * i) as u64).collect()
    } else {
        let co64 = stbl_box(file, b"co64").unwrap();
        let n = be32(co64.body, 4) as usize;
        (0..n).map(|i| be64(co64.body, 8 + 8 * i)).collect()
    }
}

pub fn sample_sizes(file: &[u8]) -> Vec<u32> {
    let stsz = stbl_box(file, b"stsz").unwrap();
    assert_eq!(be32(stsz.body, 4), 0, "constant sample size");
    let n = be32(stsz.body, 8) as usize;
    (0..n).map(|i| be32(stsz.body, 12 + 4 * i)).collect()
}

/// `(count, delta)` runs.
pub fn time_to_sample(file: &[u8]) -> Vec<(u32, u32)> {
    let stts = stbl_box(file, b"stts").unwrap();
    let n = be32(stts.body, 4) as usize;
    (0..n)
        .map(|i| (be32(stts.body, 8 + 8 * i), be32(stts.body, 12 + 8 * i)))
        .collect()
}

/// `(first_chunk, samples_per_chunk)` runs.
pub fn sample_to_chunk(file: &[u8]) -> Vec<(u32, u32)> {
    let stsc = stbl_box(file, b"stsc").unwrap();
    let n = be32(stsc.body, 4) as usize;
    (0..n)
        .map(|i| (be32(stsc.body, 8 + 12 * i), be32(stsc.body, 12 + 12 * i)))
        .collect()
}

/// Every sample payload, located through the sample tables.
pub fn samples(file: &[u8]) -> Vec<Vec<u8>> {
    let offsets = chunk_offsets(file);
    let sizes = sample_sizes(file);
    let runs = sample_to_chunk(file);
    let mut out = Vec::new();
    let mut sample = 0;
    for (i, &offset) in offsets.iter().enumerate() {
        let chunk = i as u32 + 1;
        let per_chunk = runs
            .iter()
            .take_while(|&&(first, _)| first <= chunk)
            .last()
            .unwrap()
            .1;
        let mut pos = offset as usize;
        for _ in 0..per_chunk {
            let size = sizes[sample] as usize;
            out.push(file[pos..pos + size].to_vec());
            pos += size;
            sample += 1;
        }
    }
    assert_eq!(sample, sizes.len());
    out
}

/// Payload of a `----` item's `data` box, found by name.
pub fn free_form(file: &[u8], name: &str) -> Option<String> {
    let ilst = find(file, &[b"moov", b"udta", b"meta", b"ilst"])?;
    let start = ilst.offset + 8;
    atoms(ilst.body, start)
        .into_iter()
        .filter(|a| &a.kind == b"----")
        .find_map(|item| {
            let children = atoms(item.body, item.offset + 8);
            let item_name = children.iter().find(|c| &c.kind == b"name")?;
            if &item_name.body[4..] != name.as_bytes() {
                return None;
            }
            let data = children.iter().find(|c| &c.kind == b"data")?;
            Some(String::from_utf8(data.body[8..].to_vec()).unwrap())
        })
}

/// `(type_code, payload)` of a plain item's `data` box.
pub fn item(file: &[u8], fcc: &[u8; 4]) -> Option<(u32, Vec<u8>)> {
    let data = find(file, &[b"moov", b"udta", b"meta", b"ilst", fcc, b"data"])?;
    Some((be32(data.body, 0) & 0xff_ffff, data.body[8..].to_vec()))
}

/// Deterministic sample payloads of varying size.
pub fn payloads(count: usize) -> Vec<Vec<u8>> {
    (0..count)
        .map(|i| {
            let len = 50 + (i * 37) % 400;
            (0..len).map(|j| (i * 7 + j) as u8).collect()
        })
        .collect()
}

pub fn aac_muxer() -> Muxer<Cursor<Vec<u8>>> {
    let mut muxer = Muxer::new(Codec::Aac, 44100, Cursor::new(Vec::new()), true).unwrap();
    muxer.set_decoder_specific_info(0, &[0x12, 0x10]).unwrap();
    muxer
}

pub fn mux(frames: &[Vec<u8>], optimize: bool) -> Vec<u8> {
    let mut muxer = aac_muxer();
    muxer.begin_write().unwrap();
    for frame in frames {
        muxer.append_sample(0, frame, 1024).unwrap();
    }
    muxer.finalize(optimize).unwrap();
    muxer.into_inner().into_inner()
}
