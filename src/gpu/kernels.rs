//! WGSL kernel templates.
//!
//! Three programs are generated:
//!
//! * **radix**: histogram, scan, and scatter entry points of a 4-bit LSD
//!   radix pass over `u32` key words. Independent of the element type; only
//!   the number of words per key varies.
//! * **key codec**: `encode`/`decode` entry points translating raw device
//!   elements of a built-in numeric kind into order-preserving keys and back.
//! * **bitonic**: `init`, `bitonic_step`, and `gather` entry points of a bitonic
//!   network over an index permutation, driven by the generated `cmp_less`.
//!
//! Templates use `$NAME` placeholders that are replaced textually.

use bytemuck::{Pod, Zeroable};

use crate::engine::registry::DeviceOrdering;
use crate::engine::types::{Direction, PrimitiveKind, GPU_RADIX_BITS, GPU_RADIX_BUCKETS};

/// Uniform block shared by every kernel. 32 bytes.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub(crate) struct KernelParams {
    pub(crate) n: u32,
    pub(crate) num_tiles: u32,
    pub(crate) word: u32,
    pub(crate) shift: u32,
    pub(crate) k: u32,
    pub(crate) j: u32,
    pub(crate) padded: u32,
    pub(crate) _pad: u32,
}

const PARAMS_WGSL: &str = r#"
struct Params {
    n: u32,
    num_tiles: u32,
    word: u32,
    shift: u32,
    k: u32,
    j: u32,
    padded: u32,
    _pad: u32,
}
"#;

const RADIX_TEMPLATE: &str = r#"
@group(0) @binding(0) var<storage, read> src: array<u32>;
@group(0) @binding(1) var<storage, read_write> dst: array<u32>;
@group(0) @binding(2) var<storage, read_write> hist: array<u32>;
@group(0) @binding(3) var<uniform> params: Params;

const WG: u32 = $WGu;
const WORDS: u32 = $WORDSu;
const BUCKETS: u32 = $BUCKETSu;
const DIGIT_MASK: u32 = $MASKu;

var<workgroup> local_hist: array<atomic<u32>, $BUCKETS>;
var<workgroup> tile_digits: array<u32, $WG>;
var<workgroup> partial: array<u32, $WG>;

fn digit_of(i: u32) -> u32 {
    return (src[i * WORDS + params.word] >> params.shift) & DIGIT_MASK;
}

@compute @workgroup_size($WG)
fn histogram(@builtin(local_invocation_id) lid: vec3<u32>, @builtin(workgroup_id) wid: vec3<u32>) {
    if (lid.x < BUCKETS) {
        atomicStore(&local_hist[lid.x], 0u);
    }
    workgroupBarrier();

    let i = wid.x * WG + lid.x;
    if (i < params.n) {
        atomicAdd(&local_hist[digit_of(i)], 1u);
    }
    workgroupBarrier();

    if (lid.x < BUCKETS) {
        hist[lid.x * params.num_tiles + wid.x] = atomicLoad(&local_hist[lid.x]);
    }
}

@compute @workgroup_size($WG)
fn scan(@builtin(local_invocation_id) lid: vec3<u32>) {
    let total = BUCKETS * params.num_tiles;
    let per = (total + WG - 1u) / WG;
    let begin = min(lid.x * per, total);
    let end = min(begin + per, total);

    var sum = 0u;
    for (var i = begin; i < end; i = i + 1u) {
        sum = sum + hist[i];
    }
    partial[lid.x] = sum;
    workgroupBarrier();

    for (var offset = 1u; offset < WG; offset = offset * 2u) {
        var v = 0u;
        if (lid.x >= offset) {
            v = partial[lid.x - offset];
        }
        workgroupBarrier();
        partial[lid.x] = partial[lid.x] + v;
        workgroupBarrier();
    }

    var running = partial[lid.x] - sum;
    for (var i = begin; i < end; i = i + 1u) {
        let c = hist[i];
        hist[i] = running;
        running = running + c;
    }
}

@compute @workgroup_size($WG)
fn scatter(@builtin(local_invocation_id) lid: vec3<u32>, @builtin(workgroup_id) wid: vec3<u32>) {
    let i = wid.x * WG + lid.x;
    var d = BUCKETS;
    if (i < params.n) {
        d = digit_of(i);
    }
    tile_digits[lid.x] = d;
    workgroupBarrier();

    if (i < params.n) {
        var rank = 0u;
        for (var t = 0u; t < lid.x; t = t + 1u) {
            if (tile_digits[t] == d) {
                rank = rank + 1u;
            }
        }
        let pos = hist[d * params.num_tiles + wid.x] + rank;
        for (var w = 0u; w < WORDS; w = w + 1u) {
            dst[pos * WORDS + w] = src[i * WORDS + w];
        }
    }
}
"#;

const CODEC_TEMPLATE: &str = r#"
@group(0) @binding(0) var<storage, read> src: array<u32>;
@group(0) @binding(1) var<storage, read_write> dst: array<u32>;
@group(0) @binding(2) var<uniform> params: Params;

const SIGN: u32 = 0x80000000u;

fn encode_asc(v: vec2<u32>) -> vec2<u32> {
    $ENCODE
}

fn decode_asc(k: vec2<u32>) -> vec2<u32> {
    $DECODE
}

fn load_elem(i: u32) -> vec2<u32> {
    $LOAD
}

fn store_elem(i: u32, v: vec2<u32>) {
    $STORE
}

@compute @workgroup_size($WG)
fn encode(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x;
    if (i >= params.n) {
        return;
    }
    store_elem(i, $ENCODE_EXPR);
}

@compute @workgroup_size($WG)
fn decode(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x;
    if (i >= params.n) {
        return;
    }
    store_elem(i, $DECODE_EXPR);
}
"#;

const BITONIC_TEMPLATE: &str = r#"
alias Elem = $ELEM;

fn natural_less(a: Elem, b: Elem) -> bool {
    $NATURAL
}

fn cmp_less(a: Elem, b: Elem) -> bool {
    $LESS
}

@group(0) @binding(0) var<storage, read> data: array<Elem>;
@group(0) @binding(1) var<storage, read_write> idx: array<u32>;
@group(0) @binding(2) var<storage, read_write> out: array<Elem>;
@group(0) @binding(3) var<uniform> params: Params;

fn ordered_before(ia: u32, ib: u32) -> bool {
    if (ib >= params.n) {
        return ia < params.n;
    }
    if (ia >= params.n) {
        return false;
    }
    return cmp_less(data[ia], data[ib]);
}

@compute @workgroup_size($WG)
fn init(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x;
    if (i < params.padded) {
        idx[i] = i;
    }
}

@compute @workgroup_size($WG)
fn bitonic_step(@builtin(global_invocation_id) gid: vec3<u32>) {
    let t = gid.x;
    if (t >= params.padded / 2u) {
        return;
    }
    let j = params.j;
    let i = (t / j) * 2u * j + (t % j);
    let l = i + j;
    let a = idx[i];
    let b = idx[l];
    var exchange = false;
    if ((i & params.k) == 0u) {
        exchange = ordered_before(b, a);
    } else {
        exchange = ordered_before(a, b);
    }
    if (exchange) {
        idx[i] = b;
        idx[l] = a;
    }
}

@compute @workgroup_size($WG)
fn gather(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x;
    if (i < params.n) {
        out[i] = data[idx[i]];
    }
}
"#;

/// Source of the radix pass program for keys of `words` 32-bit words.
pub(crate) fn radix_source(words: u32, workgroup_size: u32) -> String {
    let body = RADIX_TEMPLATE
        .replace("$WORDS", &words.to_string())
        .replace("$BUCKETS", &GPU_RADIX_BUCKETS.to_string())
        .replace("$MASK", &((1u32 << GPU_RADIX_BITS) - 1).to_string())
        .replace("$WG", &workgroup_size.to_string());
    format!("{PARAMS_WGSL}{body}")
}

fn codec_bodies(kind: PrimitiveKind) -> (&'static str, &'static str) {
    match kind {
        PrimitiveKind::I32 | PrimitiveKind::I16 | PrimitiveKind::I8 => (
            "return vec2<u32>(v.x ^ SIGN, 0u);",
            "return vec2<u32>(k.x ^ SIGN, 0u);",
        ),
        PrimitiveKind::F32 => (
            "return vec2<u32>(select(v.x | SIGN, ~v.x, (v.x & SIGN) != 0u), 0u);",
            "return vec2<u32>(select(~k.x, k.x ^ SIGN, (k.x & SIGN) != 0u), 0u);",
        ),
        PrimitiveKind::I64 => (
            "return vec2<u32>(v.x, v.y ^ SIGN);",
            "return vec2<u32>(k.x, k.y ^ SIGN);",
        ),
        PrimitiveKind::F64 => (
            "if ((v.y & SIGN) != 0u) {\n        return ~v;\n    }\n    return vec2<u32>(v.x, v.y | SIGN);",
            "if ((k.y & SIGN) != 0u) {\n        return vec2<u32>(k.x, k.y ^ SIGN);\n    }\n    return ~k;",
        ),
        PrimitiveKind::U8 | PrimitiveKind::U16 | PrimitiveKind::U32 | PrimitiveKind::U64 => {
            ("return v;", "return k;")
        }
    }
}

/// Source of the key codec program for device-resident elements of `kind`.
pub(crate) fn key_codec_source(kind: PrimitiveKind, direction: Direction, workgroup_size: u32) -> String {
    let (encode, decode) = codec_bodies(kind);
    let (load, store) = if kind.key_words() == 2 {
        (
            "return vec2<u32>(src[2u * i], src[2u * i + 1u]);",
            "dst[2u * i] = v.x;\n    dst[2u * i + 1u] = v.y;",
        )
    } else {
        ("return vec2<u32>(src[i], 0u);", "dst[i] = v.x;")
    };
    let (encode_expr, decode_expr) = match direction {
        Direction::Ascending => ("encode_asc(load_elem(i))", "decode_asc(load_elem(i))"),
        Direction::Descending => ("~encode_asc(load_elem(i))", "decode_asc(~load_elem(i))"),
    };

    let body = CODEC_TEMPLATE
        .replace("$ENCODE_EXPR", encode_expr)
        .replace("$DECODE_EXPR", decode_expr)
        .replace("$ENCODE", encode)
        .replace("$DECODE", decode)
        .replace("$LOAD", load)
        .replace("$STORE", store)
        .replace("$WG", &workgroup_size.to_string());
    format!("{PARAMS_WGSL}{body}")
}

/// Source of the bitonic program for one resolved device ordering.
pub(crate) fn bitonic_source(ordering: &DeviceOrdering, workgroup_size: u32) -> String {
    let descriptor = &ordering.element.descriptor;
    let elem = descriptor.wgsl_type().unwrap_or("u32");
    let natural = descriptor.natural_less().unwrap_or("return false;");

    let body = BITONIC_TEMPLATE
        .replace("$ELEM", elem)
        .replace("$NATURAL", natural)
        .replace("$LESS", &ordering.less_body)
        .replace("$WG", &workgroup_size.to_string());
    format!("{PARAMS_WGSL}\n{}\n{body}", descriptor.declaration())
}
